// Tables: literals, array/hash parts, the length operator, and the
// underlying open-addressing table.

use crate::gc::{GC, ObjectPool};
use crate::test::{new_vm, run_ok};
use crate::value::{Table, Value};
use crate::lua_vm::LuaError;

#[test]
fn literal_with_mixed_items() {
    run_ok(
        r#"
        local t = { "a", "b", name = "x" }
        assert(t[1] == "a")
        assert(t[2] == "b")
        assert(t.name == "x")
        assert(#t == 2)
    "#,
    );
}

#[test]
fn literal_with_computed_keys() {
    run_ok(
        r#"
        local t = { "a", [3] = "c", ["key"] = "v" }
        assert(t[1] == "a")
        assert(t[3] == "c")
        assert(t[2] == nil)
        assert(t.key == "v")
        assert(#t == 3)
    "#,
    );
}

#[test]
fn literal_items_may_be_expressions() {
    run_ok(
        r#"
        local a = 2
        local t = { a, a + 1, a * a }
        assert(t[1] == 2)
        assert(t[2] == 3)
        assert(t[3] == 4)
    "#,
    );
}

#[test]
fn set_grows_array_with_nil_padding() {
    run_ok(
        r#"
        local t = {}
        t[5] = "five"
        assert(#t == 5)
        assert(t[1] == nil)
        assert(t[5] == "five")
    "#,
    );
}

#[test]
fn get_of_missing_key_is_nil_not_error() {
    run_ok(
        r#"
        local t = {}
        assert(t[1] == nil)
        assert(t[99] == nil)
        assert(t.missing == nil)
        assert(t["nope"] == nil)
    "#,
    );
}

#[test]
fn string_and_subscript_access_agree() {
    run_ok(
        r#"
        local t = {}
        t.alpha = 1
        assert(t["alpha"] == 1)
        t["beta"] = 2
        assert(t.beta == 2)
    "#,
    );
}

#[test]
fn non_integer_number_key_truncates() {
    run_ok(
        r#"
        local t = { "one", "two" }
        assert(t[1.5] == "one")
    "#,
    );
}

#[test]
fn invalid_key_type_rejected_on_set() {
    let mut vm = new_vm();
    let result = vm.execute_string("local t = {} t[true] = 1");
    assert!(matches!(result, Err(LuaError::Runtime(_))));

    let mut vm = new_vm();
    let result = vm.execute_string("local t = {} t[0] = 1");
    assert!(matches!(result, Err(LuaError::Runtime(_))));
}

#[test]
fn indexing_a_non_table_fails() {
    let mut vm = new_vm();
    let result = vm.execute_string("local x = 5 local y = x[1]");
    assert!(matches!(result, Err(LuaError::Runtime(_))));
}

#[test]
fn tables_nest() {
    run_ok(
        r#"
        local t = { inner = { 10, 20 } }
        assert(t.inner[2] == 20)
        t.inner[3] = 30
        assert(#t.inner == 3)
    "#,
    );
}

// ============ The open-addressing table itself ============

fn sample_pool() -> (ObjectPool, GC) {
    (ObjectPool::new(), GC::new())
}

#[test]
fn set_get_delete_roundtrip() {
    let (mut pool, mut gc) = sample_pool();
    let mut table = Table::new();

    let key = pool.copy_string(&mut gc, "k");
    let hash = pool.string_hash(key);

    assert!(table.set(key, hash, Value::Number(1.0)));
    assert_eq!(table.get(key, hash), Some(Value::Number(1.0)));

    // Update is not an insert.
    assert!(!table.set(key, hash, Value::Number(2.0)));
    assert_eq!(table.get(key, hash), Some(Value::Number(2.0)));

    assert!(table.delete(key, hash));
    assert_eq!(table.get(key, hash), None);
    assert!(!table.delete(key, hash));
}

#[test]
fn survives_growth_and_tombstones() {
    let (mut pool, mut gc) = sample_pool();
    let mut table = Table::new();

    let keys: Vec<_> = (0..64)
        .map(|i| {
            let id = pool.copy_string(&mut gc, &format!("key{i}"));
            (id, pool.string_hash(id))
        })
        .collect();

    for (i, &(key, hash)) in keys.iter().enumerate() {
        table.set(key, hash, Value::Number(i as f64));
    }
    // Delete every other key, then reinsert to exercise tombstone reuse.
    for &(key, hash) in keys.iter().step_by(2) {
        assert!(table.delete(key, hash));
    }
    for &(key, hash) in keys.iter().step_by(2) {
        assert!(table.set(key, hash, Value::Bool(true)));
    }
    for (i, &(key, hash)) in keys.iter().enumerate() {
        let expected = if i % 2 == 0 {
            Value::Bool(true)
        } else {
            Value::Number(i as f64)
        };
        assert_eq!(table.get(key, hash), Some(expected));
    }
    assert_eq!(table.live_count(), 64);
}

#[test]
fn add_all_copies_every_live_entry() {
    let (mut pool, mut gc) = sample_pool();
    let mut source = Table::new();
    let mut dest = Table::new();

    for name in ["a", "b", "c"] {
        let id = pool.copy_string(&mut gc, name);
        source.set(id, pool.string_hash(id), Value::Number(1.0));
    }
    source.add_all_into(&mut dest);
    assert_eq!(dest.live_count(), 3);
}

#[test]
fn find_string_matches_by_content() {
    let (mut pool, mut gc) = sample_pool();

    let id = pool.copy_string(&mut gc, "needle");
    let hash = pool.string_hash(id);
    // The intern table inside the pool indexes every string.
    assert_eq!(pool.intern.find_string(&pool.strings, "needle", hash), Some(id));
    let missing = crate::value::hash_bytes(b"absent");
    assert_eq!(pool.intern.find_string(&pool.strings, "absent", missing), None);
}
