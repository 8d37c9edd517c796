use crate::lang::object::PopEnd;
use crate::lang::value::Value;
use crate::runtime::vm::Engine;

/// `len_of(obj)`: element count of a sequence or string.
pub fn native_len_of(engine: &mut Engine, argc: i16) -> bool {
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

/// `list_push_back(seq, item)`: append; yields the new length.
pub fn native_list_push_back(engine: &mut Engine, argc: i16) -> bool {
    let target = *engine.native_arg(argc, 0);
    let item = *engine.native_arg(argc, 1);

    let Some(obj_id) = target.object_id() else {
        return false;
    };

    let Some(object) = engine.heap_mut().get_mut(obj_id) else {
        return false;
    };

    if !object.push(item) {
        return false;
    }

    let len = object.size() as i32;

    engine.native_return(Value::Int(len), argc);

    true
}

fn pop_impl(engine: &mut Engine, argc: i16, end: PopEnd) -> bool {
    let target = *engine.native_arg(argc, 0);

    let Some(obj_id) = target.object_id() else {
        return false;
    };

    let popped = engine
        .heap_mut()
        .get_mut(obj_id)
        .and_then(|object| object.pop(end));

    match popped {
        Some(cell) => {
            engine.native_return(cell, argc);
            true
        }
        None => false,
    }
}

/// `list_pop_back(seq)`: remove and yield the last element.
pub fn native_list_pop_back(engine: &mut Engine, argc: i16) -> bool {
    pop_impl(engine, argc, PopEnd::Back)
}

/// `list_pop_front(seq)`: remove and yield the first element.
pub fn native_list_pop_front(engine: &mut Engine, argc: i16) -> bool {
    pop_impl(engine, argc, PopEnd::Front)
}

/// `list_concat(dst, src)`: append every item of `src` onto `dst`.
pub fn native_list_concat(engine: &mut Engine, argc: i16) -> bool {
    let target = *engine.native_arg(argc, 0);
    let source = *engine.native_arg(argc, 1);

    let (Some(target_id), Some(source_id)) = (target.object_id(), source.object_id()) else {
        return false;
    };

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
