// Bytecode disassembler, used by --dump-bytecode and --trace.

use crate::gc::ObjectPool;
use crate::lua_vm::OpCode;
use crate::value::Chunk;

pub fn disassemble_chunk(pool: &ObjectPool, chunk: &Chunk, name: &str) {
    println!("== {} ==", name);
    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(pool, chunk, offset);
    }
}

/// Print one instruction and return the offset of the next.
pub fn disassemble_instruction(pool: &ObjectPool, chunk: &Chunk, offset: usize) -> usize {
    print!("{:04} ", offset);
    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.line_at(offset));
    }

    let Some(op) = OpCode::from_byte(chunk.code[offset]) else {
        println!("Unknown opcode {}", chunk.code[offset]);
        return offset + 1;
    };

    match op {
        OpCode::Constant => constant_instruction(pool, "OP_CONSTANT", chunk, offset),
        OpCode::Nil => simple_instruction("OP_NIL", offset),
        OpCode::True => simple_instruction("OP_TRUE", offset),
        OpCode::False => simple_instruction("OP_FALSE", offset),
        OpCode::Pop => simple_instruction("OP_POP", offset),
        OpCode::PopN => byte_instruction("OP_POPN", chunk, offset),
        OpCode::GetLocal => byte_instruction("OP_GET_LOCAL", chunk, offset),
        OpCode::SetLocal => byte_instruction("OP_SET_LOCAL", chunk, offset),
        OpCode::GetGlobal => constant_instruction(pool, "OP_GET_GLOBAL", chunk, offset),
        OpCode::SetGlobal => constant_instruction(pool, "OP_SET_GLOBAL", chunk, offset),
        OpCode::DefineGlobal => constant_instruction(pool, "OP_DEFINE_GLOBAL", chunk, offset),
        OpCode::GetUpvalue => byte_instruction("OP_GET_UPVALUE", chunk, offset),
        OpCode::SetUpvalue => byte_instruction("OP_SET_UPVALUE", chunk, offset),
        OpCode::CloseUpvalue => simple_instruction("OP_CLOSE_UPVALUE", offset),
        OpCode::Add => simple_instruction("OP_ADD", offset),
        OpCode::Subtract => simple_instruction("OP_SUBTRACT", offset),
        OpCode::Multiply => simple_instruction("OP_MULTIPLY", offset),
        OpCode::Divide => simple_instruction("OP_DIVIDE", offset),
        OpCode::Modulo => simple_instruction("OP_MODULO", offset),
        OpCode::Negate => simple_instruction("OP_NEGATE", offset),
        OpCode::Concat => simple_instruction("OP_CONCAT", offset),
        OpCode::Length => simple_instruction("OP_LENGTH", offset),
        OpCode::Not => simple_instruction("OP_NOT", offset),
        OpCode::Equal => simple_instruction("OP_EQUAL", offset),
        OpCode::Greater => simple_instruction("OP_GREATER", offset),
        OpCode::Less => simple_instruction("OP_LESS", offset),
        OpCode::Jump => jump_instruction("OP_JUMP", 1, chunk, offset),
        OpCode::JumpIfFalse => jump_instruction("OP_JUMP_IF_FALSE", 1, chunk, offset),
        OpCode::Loop => jump_instruction("OP_LOOP", -1, chunk, offset),
        OpCode::Call => byte_instruction("OP_CALL", chunk, offset),
        OpCode::Closure => closure_instruction(pool, chunk, offset),
        OpCode::Return => simple_instruction("OP_RETURN", offset),
        OpCode::Class => constant_instruction(pool, "OP_CLASS", chunk, offset),
        OpCode::Inherit => simple_instruction("OP_INHERIT", offset),
        OpCode::Method => method_instruction(pool, chunk, offset),
        OpCode::GetProperty => constant_instruction(pool, "OP_GET_PROPERTY", chunk, offset),
        OpCode::SetProperty => constant_instruction(pool, "OP_SET_PROPERTY", chunk, offset),
        OpCode::GetSuper => constant_instruction(pool, "OP_GET_SUPER", chunk, offset),
        OpCode::Invoke => invoke_instruction(pool, "OP_INVOKE", chunk, offset),
        OpCode::SuperInvoke => invoke_instruction(pool, "OP_SUPER_INVOKE", chunk, offset),
        OpCode::New => byte_instruction("OP_NEW", chunk, offset),
        OpCode::Table => simple_instruction("OP_TABLE", offset),
        OpCode::TableGet => simple_instruction("OP_TABLE_GET", offset),
        OpCode::TableSet => simple_instruction("OP_TABLE_SET", offset),
        OpCode::TableSetEntry => simple_instruction("OP_TABLE_SET_ENTRY", offset),
        OpCode::TableAdd => simple_instruction("OP_TABLE_ADD", offset),
        OpCode::TableSetField => constant_instruction(pool, "OP_TABLE_SET_FIELD", chunk, offset),
        OpCode::Trait => constant_instruction(pool, "OP_TRAIT", chunk, offset),
        OpCode::Implement => simple_instruction("OP_IMPLEMENT", offset),
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    println!("{name}");
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    println!("{name:<16} {slot:4}");
    offset + 2
}

fn constant_instruction(pool: &ObjectPool, name: &str, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1];
    let value = chunk
        .constants
        .get(constant as usize)
        .map(|v| pool.display_value(v))
        .unwrap_or_default();
    println!("{name:<16} {constant:4} '{value}'");
    offset + 2
}

fn jump_instruction(name: &str, sign: i64, chunk: &Chunk, offset: usize) -> usize {
    let jump = ((chunk.code[offset + 1] as i64) << 8) | chunk.code[offset + 2] as i64;
    let target = offset as i64 + 3 + sign * jump;
    println!("{name:<16} {offset:4} -> {target}");
    offset + 3
}

fn invoke_instruction(pool: &ObjectPool, name: &str, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1];
    let arg_count = chunk.code[offset + 2];
    let value = chunk
        .constants
        .get(constant as usize)
        .map(|v| pool.display_value(v))
        .unwrap_or_default();
    println!("{name:<16} ({arg_count} args) {constant:4} '{value}'");
    offset + 3
}

fn method_instruction(pool: &ObjectPool, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1];
    let is_private = chunk.code[offset + 2] != 0;
    let value = chunk
        .constants
        .get(constant as usize)
        .map(|v| pool.display_value(v))
        .unwrap_or_default();
    let marker = if is_private { " private" } else { "" };
    println!("{:<16} {constant:4} '{value}'{marker}", "OP_METHOD");
    offset + 3
}

fn closure_instruction(pool: &ObjectPool, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1];
    let value = chunk.constants.get(constant as usize).unwrap_or_default();
    println!(
        "{:<16} {constant:4} '{}'",
        "OP_CLOSURE",
        pool.display_value(value)
    );

    let mut offset = offset + 2;
    let upvalue_count = value
        .as_function_id()
        .and_then(|id| pool.functions.get(id.0))
        .map(|f| f.upvalue_count as usize)
        .unwrap_or(0);
    for _ in 0..upvalue_count {
        let is_local = chunk.code[offset] != 0;
        let index = chunk.code[offset + 1];
        println!(
            "{:04}    |                     {} {}",
            offset,
            if is_local { "local" } else { "upvalue" },
            index
        );
        offset += 2;
    }
    offset
}
