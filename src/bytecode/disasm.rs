use crate::bytecode::op::{ArgMode, Chunk, Instruction, Opcode, Program};

/// Print the disassembly of a whole program.
pub fn print_program(program: &Program) {
    println!("=== BYTECODE PROGRAM ===\n");

    for (index, chunk) in program.chunks.iter().enumerate() {
        let label = match program.entry_id {
            Some(entry) if entry as usize == index => format!("fn[{}] (entry)", index),
            _ => format!("fn[{}]", index),
        };

        print_chunk(&label, chunk);
    }

    if !program.constants.is_empty() {
        println!("constants:");

        for (index, value) in program.constants.iter().enumerate() {
            println!("  k{:<3} {:?}", index, value);
        }

        println!();
    }

    if !program.pre_objects.is_empty() {
        println!("preloaded objects:");

        for (index, object) in program.pre_objects.iter().enumerate() {
            match object.as_text() {
                Some(text) => println!("  h{:<3} \"{}\"", index, text),
                None => println!("  h{:<3} {:?}", index, object),
            }
        }

        println!();
    }
}

/// Print one chunk with a banner header.
pub fn print_chunk(name: &str, chunk: &Chunk) {
    println!("════════════════════════════════════════");
    println!(" {}", name);
    println!(" {} instructions", chunk.len());
    println!("════════════════════════════════════════");

    let targets = collect_jump_targets(chunk);

    for (ip, inst) in chunk.iter().enumerate() {
        let marker = if targets.contains(&ip) { "►" } else { " " };

        println!("{:04} {} {}", ip, marker, format_instruction(inst));
    }

    println!();
}

fn collect_jump_targets(chunk: &Chunk) -> Vec<usize> {
    let mut targets = Vec::new();

    for inst in chunk {
        let target = match inst.op {
            Opcode::Jump => Some(inst.args[0]),
            Opcode::JumpIf | Opcode::JumpElse => Some(inst.args[1]),
            _ => None,
        };

        if let Some(target) = target {
            let target = target.max(0) as usize;

            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }

    targets
}

fn format_arg(inst: &Instruction, pos: usize) -> String {
    let id = inst.args[pos];

    match inst.arg_mode(pos) {
        Some(ArgMode::Immediate) | None => format!("{}", id),
        Some(ArgMode::Constant) => format!("k{}", id),
        Some(ArgMode::Reg) => format!("r{}", id),
        Some(ArgMode::Stack) => format!("s{}", id),
        Some(ArgMode::Heap) => format!("h{}", id),
    }
}

/// One instruction as `name arg, arg, arg` with mode-prefixed operands.
pub fn format_instruction(inst: &Instruction) -> String {
    let arity = inst.arity() as usize;

    // Jumps carry structural targets past the encoded arity.
    let shown = match inst.op {
        Opcode::JumpIf | Opcode::JumpElse | Opcode::Call | Opcode::NativeCall => 2,
        Opcode::Jump => 1,
        _ => arity,
    };

    let args: Vec<String> = (0..shown.max(arity).min(3))
        .map(|pos| format_arg(inst, pos))
        .collect();

    if args.is_empty() {
        inst.op.name().to_string()
    } else {
        format!("{:<12} {}", inst.op.name(), args.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_plain_instruction() {
        let inst = Instruction::new(
            Opcode::Add,
            [2, 0, 1],
            &[ArgMode::Reg, ArgMode::Reg, ArgMode::Constant],
        );

        assert_eq!(format_instruction(&inst), "add          r2, r0, k1");
    }

    #[test]
    fn test_format_nonary() {
        let inst = Instruction::new(Opcode::Nop, [0, 0, 0], &[]);

        assert_eq!(format_instruction(&inst), "nop");
    }

    #[test]
    fn test_jump_targets_collected() {
        let chunk = vec![
            Instruction::new(Opcode::Nop, [0, 0, 0], &[]),
            Instruction::new(
                Opcode::JumpElse,
                [0, 3, 0],
                &[ArgMode::Reg, ArgMode::Immediate],
            ),
            Instruction::new(Opcode::Jump, [0, 0, 0], &[ArgMode::Immediate]),
            Instruction::new(Opcode::Nop, [0, 0, 0], &[]),
        ];

        let targets = collect_jump_targets(&chunk);

        assert!(targets.contains(&3));
        assert!(targets.contains(&0));
    }
}
