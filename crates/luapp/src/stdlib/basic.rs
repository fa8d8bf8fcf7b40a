// Basic library (global natives)
// Implements: print, read, type, tonumber, tostring, error, assert,
// rawget, rawset, pairs, ipairs, next

use std::io::BufRead;

use crate::lib_registry::LibraryModule;
use crate::lua_vm::{LuaResult, LuaVM};
use crate::value::{ObjRef, Value};

pub fn create_basic_lib() -> LibraryModule {
    crate::lib_module!("_G", {
        "print" => lua_print,
        "read" => lua_read,
        "type" => lua_type,
        "tonumber" => lua_tonumber,
        "tostring" => lua_tostring,
        "error" => lua_error,
        "assert" => lua_assert,
        "rawget" => lua_rawget,
        "rawset" => lua_rawset,
        "pairs" => lua_pairs,
        "ipairs" => lua_ipairs,
        "next" => lua_next,
    })
}

/// print(...) - write the arguments to stdout, tab-separated.
fn lua_print(vm: &mut LuaVM, args: &[Value]) -> LuaResult<Value> {
    let rendered: Vec<String> = args.iter().map(|v| vm.pool.display_value(*v)).collect();
    println!("{}", rendered.join("\t"));
    Ok(Value::Nil)
}

/// read() - one line from stdin, without the trailing newline.
fn lua_read(vm: &mut LuaVM, _args: &[Value]) -> LuaResult<Value> {
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => Ok(Value::Nil),
        Ok(_) => {
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            Ok(vm.take_string_value(line))
        }
    }
}

/// type(v) - the value's type name as a string.
fn lua_type(vm: &mut LuaVM, args: &[Value]) -> LuaResult<Value> {
    let Some(value) = args.first() else {
        return Ok(Value::Nil);
    };
    let name = match value {
        Value::Nil => "nil",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::Obj(r) => match r {
            ObjRef::String(_) => "string",
            ObjRef::Function(_)
            | ObjRef::Native(_)
            | ObjRef::Closure(_)
            | ObjRef::BoundMethod(_) => "function",
            ObjRef::Class(_) => "class",
            ObjRef::Instance(_) => "instance",
            ObjRef::Table(_) => "table",
            ObjRef::Trait(_) => "trait",
            ObjRef::Upvalue(_) => "upvalue",
        },
    };
    Ok(vm.copy_string_value(name))
}

/// tonumber(v) - numbers pass through; strings parse or yield nil.
fn lua_tonumber(vm: &mut LuaVM, args: &[Value]) -> LuaResult<Value> {
    match args.first() {
        Some(Value::Number(n)) => Ok(Value::Number(*n)),
        Some(value) => {
            if let Some(id) = value.as_string_id() {
                match vm.pool.string(id).trim().parse::<f64>() {
                    Ok(n) => Ok(Value::Number(n)),
                    Err(_) => Ok(Value::Nil),
                }
            } else {
                Ok(Value::Nil)
            }
        }
        None => Ok(Value::Nil),
    }
}

/// tostring(v) - the same rendering print uses.
fn lua_tostring(vm: &mut LuaVM, args: &[Value]) -> LuaResult<Value> {
    let Some(value) = args.first() else {
        return Ok(Value::Nil);
    };
    if value.is_string() {
        return Ok(*value);
    }
    let rendered = vm.pool.display_value(*value);
    Ok(vm.take_string_value(rendered))
}

/// error(message) - raise a runtime error.
fn lua_error(vm: &mut LuaVM, args: &[Value]) -> LuaResult<Value> {
    let message = args
        .first()
        .map(|v| vm.pool.display_value(*v))
        .unwrap_or_else(|| "error".to_string());
    Err(vm.runtime_error(message))
}

/// assert(v [, message]) - raise if v is falsey, else return v.
fn lua_assert(vm: &mut LuaVM, args: &[Value]) -> LuaResult<Value> {
    let condition = args.first().copied().unwrap_or(Value::Nil);
    if condition.is_truthy() {
        return Ok(condition);
    }
    let message = args
        .get(1)
        .map(|v| vm.pool.display_value(*v))
        .unwrap_or_else(|| "assertion failed!".to_string());
    Err(vm.runtime_error(message))
}

/// rawget(t, k) - table read; nil for missing keys or bad arguments.
fn lua_rawget(vm: &mut LuaVM, args: &[Value]) -> LuaResult<Value> {
    let (Some(table), Some(key)) = (args.first(), args.get(1)) else {
        eprintln!("rawget: expected table and key");
        return Ok(Value::Nil);
    };
    let Some(id) = table.as_table_id() else {
        eprintln!("rawget: first argument is not a table");
        return Ok(Value::Nil);
    };
    Ok(vm.table_index(id, *key).unwrap_or(Value::Nil))
}

/// rawset(t, k, v) - table write; returns the table.
fn lua_rawset(vm: &mut LuaVM, args: &[Value]) -> LuaResult<Value> {
    let (Some(table), Some(key)) = (args.first().copied(), args.get(1).copied()) else {
        eprintln!("rawset: expected table and key");
        return Ok(Value::Nil);
    };
    let value = args.get(2).copied().unwrap_or(Value::Nil);
    let Some(id) = table.as_table_id() else {
        eprintln!("rawset: first argument is not a table");
        return Ok(Value::Nil);
    };
    if let Err(message) = vm.table_store(id, key, value) {
        eprintln!("rawset: {message}");
        return Ok(Value::Nil);
    }
    Ok(table)
}

/// pairs(t) - returns the table; iteration drives through `next`.
fn lua_pairs(_vm: &mut LuaVM, args: &[Value]) -> LuaResult<Value> {
    Ok(args.first().copied().unwrap_or(Value::Nil))
}

/// ipairs(t) - returns the table; iteration drives through `next`.
fn lua_ipairs(_vm: &mut LuaVM, args: &[Value]) -> LuaResult<Value> {
    Ok(args.first().copied().unwrap_or(Value::Nil))
}

/// next(t [, key]) - the next key/value pair after `key`, as a two-element
/// pair-table {nextKey, nextValue}, or nil when iteration is done. Walks the
/// array part first (skipping nil padding), then the hash part in bucket
/// order.
fn lua_next(vm: &mut LuaVM, args: &[Value]) -> LuaResult<Value> {
    let Some(id) = args.first().and_then(|v| v.as_table_id()) else {
        eprintln!("next: expected table");
        return Ok(Value::Nil);
    };
    let key = args.get(1).copied().unwrap_or(Value::Nil);

    let pair = next_pair(vm, id, key);
    match pair {
        Some((next_key, next_value)) => {
            // Build the pair-table; the source table and values stay rooted
            // through the native's argument slots.
            let result = vm.new_table();
            if let Some(table) = vm.pool.tables.get_mut(result.0) {
                table.array.write(next_key);
                table.array.write(next_value);
            }
            Ok(Value::table(result))
        }
        None => Ok(Value::Nil),
    }
}

fn next_pair(
    vm: &LuaVM,
    id: crate::gc::TableId,
    key: Value,
) -> Option<(Value, Value)> {
    let table = vm.pool.tables.get(id.0)?;
    let array_len = table.array.len();

    // Where does the walk resume?
    let array_from = match key {
        Value::Nil => Some(0),
        Value::Number(n) => {
            let index = n as i64;
            if index >= 1 && (index as usize) <= array_len {
                Some(index as usize)
            } else {
                None
            }
        }
        _ => None,
    };

    if let Some(from) = array_from {
        for i in from..array_len {
            if let Some(value) = table.array.get(i) {
                if !value.is_nil() {
                    return Some((Value::Number((i + 1) as f64), value));
                }
            }
        }
        // Array exhausted: fall into the hash part from its first bucket.
        return table
            .entries
            .entry_at_or_after(0)
            .map(|(_, k, v)| (Value::string(k), v));
    }

    // Resuming from a string key: find its bucket and scan past it.
    let string_key = key.as_string_id()?;
    let hash = vm.pool.string_hash(string_key);
    let bucket = table.entries.bucket_of(string_key, hash)?;
    table
        .entries
        .entry_at_or_after(bucket + 1)
        .map(|(_, k, v)| (Value::string(k), v))
}
