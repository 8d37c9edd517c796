use crate::lang::object::{HeapObject, ObjectKind};
use crate::lang::value::Value;
use crate::runtime::vm::Engine;

/// `strlen(s)`: character count of a string.
pub fn native_strlen(engine: &mut Engine, argc: i16) -> bool {
    let cell = *engine.native_arg(argc, 0);

    let Some(obj_id) = cell.object_id() else {
        return false;
    };

    match engine.heap().get(obj_id) {
        Some(object) => {
            let len = object.size() as i32;

            engine.native_return(Value::Int(len), argc);
            true
        }
        None => false,
    }
}

/// `strcat(dst, src)`: push every char of string `src` onto string `dst`.
pub fn native_strcat(engine: &mut Engine, argc: i16) -> bool {
    let target = *engine.native_arg(argc, 0);
    let source = *engine.native_arg(argc, 1);

    let (Some(target_id), Some(source_id)) = (target.object_id(), source.object_id()) else {
        return false;
    };

    let both_strings = [target_id, source_id].iter().all(|id| {
        engine
            .heap()
            .get(*id)
            .map(|object| object.kind() == ObjectKind::String)
            .unwrap_or(false)
    });

    if !both_strings {
        return false;
    }

    let items = match engine.heap().get(source_id) {
        Some(object) => object.items().to_vec(),
        None => return false,
    };

    let Some(target_obj) = engine.heap_mut().get_mut(target_id) else {
        return false;
    };

    for item in items {
        if !target_obj.push(item) {
            return false;
        }
    }

    true
}

/// `substr(s, begin, len)`: slice copy `[begin, begin + len)` into a
/// fresh string. The slice must end strictly inside the source.
pub fn native_substr(engine: &mut Engine, argc: i16) -> bool {
    let source = *engine.native_arg(argc, 0);
    let begin = engine.native_arg(argc, 1).to_scalar().unwrap_or(0);
    let len = engine.native_arg(argc, 2).to_scalar().unwrap_or(0);

    let Some(source_id) = source.object_id() else {
        return false;
    };

    if len == 0 || begin < 0 {
        return false;
    }

    let text = match engine.heap().get(source_id) {
        Some(object) if object.kind() == ObjectKind::String => {
            object.as_text().unwrap_or_default()
        }
        _ => return false,
    };

    let slice_end = (begin + len) as usize;

    if slice_end >= text.len() {
        return false;
    }

    let slice: String = text
        .chars()
        .skip(begin as usize)
        .take(len as usize)
        .collect();
    let id = engine.heap_mut().alloc(HeapObject::new_str(&slice));

    engine.native_return(Value::Str(id), argc);

    true
}
