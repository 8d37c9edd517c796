use crate::lang::value::Value;
use crate::runtime::vm::Engine;

fn arg_text(engine: &mut Engine, argc: i16) -> Option<String> {
    let cell = *engine.native_arg(argc, 0);
    let obj_id = cell.object_id()?;

    engine.heap().get(obj_id)?.as_text()
}

/// `stoi(s)`: parse a heap string as an integer.
pub fn native_stoi(engine: &mut Engine, argc: i16) -> bool {
    let Some(text) = arg_text(engine, argc) else {
        return false;
    };

    match text.trim().parse::<i32>() {
        Ok(parsed) => {
            engine.native_return(Value::Int(parsed), argc);
            true
        }
        Err(parse_error) => {
            eprintln!("native error: stoi('{}'): {}", text, parse_error);
            false
        }
    }
}

/// `stof(s)`: parse a heap string as a float.
pub fn native_stof(engine: &mut Engine, argc: i16) -> bool {
    let Some(text) = arg_text(engine, argc) else {
        return false;
    };

    match text.trim().parse::<f64>() {
        Ok(parsed) => {
            engine.native_return(Value::Float(parsed), argc);
            true
        }
        Err(parse_error) => {
            eprintln!("native error: stof('{}'): {}", text, parse_error);
            false
        }
    }
}

/// `get_argv()`: the program-arguments sequence.
pub fn native_get_argv(engine: &mut Engine, argc: i16) -> bool {
    let argv_id = engine.argv_object();

    engine.native_return(Value::Seq(argv_id), argc);

    true
}
