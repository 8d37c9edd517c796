use std::io::{self, BufRead, Write};

use crate::lang::object::HeapObject;
use crate::lang::value::Value;
use crate::runtime::vm::Engine;

/// `print(x)`: render the argument to stdout with a trailing newline.
pub fn native_print(engine: &mut Engine, argc: i16) -> bool {
    let cell = *engine.native_arg(argc, 0);

    println!("{}", engine.render(&cell));
    io::stdout().flush().ok();

    true
}

/// `prompt_int()`: read an integer from stdin; malformed input reads as 0.
pub fn native_prompt_int(engine: &mut Engine, argc: i16) -> bool {
    let mut line = String::new();

    io::stdin().lock().read_line(&mut line).ok();

    let parsed = line.trim().parse::<i32>().unwrap_or(0);

    engine.native_return(Value::Int(parsed), argc);

    true
}

/// `prompt_float()`: read a float from stdin; malformed input reads as 0.
pub fn native_prompt_float(engine: &mut Engine, argc: i16) -> bool {
    let mut line = String::new();

    io::stdin().lock().read_line(&mut line).ok();

    let parsed = line.trim().parse::<f64>().unwrap_or(0.0);

    engine.native_return(Value::Float(parsed), argc);

    true
}

/// `readln()`: read one line into a fresh heap string.
pub fn native_readln(engine: &mut Engine, argc: i16) -> bool {
    let mut line = String::new();

    if io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }

    let trimmed = line.trim_end_matches(['\r', '\n']);
    let id = engine.heap_mut().alloc(HeapObject::new_str(trimmed));

    engine.native_return(Value::Str(id), argc);

    true
}
