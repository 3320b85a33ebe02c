//! Tera surface over the merge store.
//!
//! Templates see these functions, all keyword-argument style:
//!
//! | function | example | returns |
//! |----------|---------|---------|
//! | `exists` | `exists(key="/a")` | bool |
//! | `getv`   | `getv(key="/a", default="x")` | value (error if absent and no default) |
//! | `getvs`  | `getvs(pattern="/svc/*/port")` | array of values |
//! | `ls`     | `ls(prefix="/svc")` | child segment names |
//! | `lsdir`  | `lsdir(prefix="/svc")` | subdirectory segment names only |
//! | `getall` | `getall(prefix="/")` | array of `{key, value}` objects |

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tera::{Tera, Value};

use vigil_store::Store;

use crate::error::RenderError;

fn str_arg(args: &HashMap<String, Value>, name: &str, func: &str) -> tera::Result<String> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(tera::Error::msg(format!(
            "{func}: argument '{name}' must be a string, got {other}"
        ))),
        None => Err(tera::Error::msg(format!(
            "{func}: missing required argument '{name}'"
        ))),
    }
}

fn register_functions(tera: &mut Tera, store: &Arc<Store>) {
    let s = Arc::clone(store);
    tera.register_function(
        "exists",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let key = str_arg(args, "key", "exists")?;
            Ok(Value::Bool(s.exists(&key)))
        },
    );

    let s = Arc::clone(store);
    tera.register_function(
        "getv",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let key = str_arg(args, "key", "getv")?;
            match s.get(&key) {
                Some(value) => Ok(Value::String(value)),
                None => match args.get("default") {
                    Some(Value::String(default)) => Ok(Value::String(default.clone())),
                    Some(other) => Ok(other.clone()),
                    None => Err(tera::Error::msg(format!("getv: key not found: {key}"))),
                },
            }
        },
    );

    let s = Arc::clone(store);
    tera.register_function(
        "getvs",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let pattern = str_arg(args, "pattern", "getvs")?;
            let values: Vec<Value> = s
                .list(&pattern)
                .into_iter()
                .map(|pair| Value::String(pair.value))
                .collect();
            Ok(Value::Array(values))
        },
    );

    let s = Arc::clone(store);
    tera.register_function(
        "ls",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let prefix = str_arg(args, "prefix", "ls")?;
            let names: Vec<Value> = s
                .children(&prefix)
                .into_iter()
                .map(|entry| Value::String(entry.name))
                .collect();
            Ok(Value::Array(names))
        },
    );

    let s = Arc::clone(store);
    tera.register_function(
        "lsdir",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let prefix = str_arg(args, "prefix", "lsdir")?;
            let names: Vec<Value> = s
                .children(&prefix)
                .into_iter()
                .filter(|entry| entry.dir)
                .map(|entry| Value::String(entry.name))
                .collect();
            Ok(Value::Array(names))
        },
    );

    let s = Arc::clone(store);
    tera.register_function(
        "getall",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let prefix = str_arg(args, "prefix", "getall")?;
            let pairs: Vec<Value> = s
                .get_all(&prefix)
                .into_iter()
                .map(|pair| json!({ "key": pair.key, "value": pair.value }))
                .collect();
            Ok(Value::Array(pairs))
        },
    );
}

/// Render one template body against the merged store.
pub fn render_source(source: &str, store: &Arc<Store>) -> Result<String, RenderError> {
    let mut tera = Tera::default();
    register_functions(&mut tera, store);
    tera.add_raw_template("template", source)?;
    Ok(tera.render("template", &tera::Context::new())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Arc<Store> {
        let store = Store::new();
        store.replace_all([
            ("/svc/web/port".to_string(), "80".to_string()),
            ("/svc/db/port".to_string(), "5432".to_string()),
            ("/motd".to_string(), "hello".to_string()),
        ]);
        Arc::new(store)
    }

    #[test]
    fn getv_returns_value_or_default() {
        let store = seeded();
        assert_eq!(
            render_source(r#"{{ getv(key="/motd") }}"#, &store).expect("render"),
            "hello"
        );
        assert_eq!(
            render_source(r#"{{ getv(key="/none", default="n/a") }}"#, &store).expect("render"),
            "n/a"
        );
    }

    #[test]
    fn getv_without_default_errors_on_missing_key() {
        let store = seeded();
        let err = render_source(r#"{{ getv(key="/none") }}"#, &store);
        assert!(err.is_err(), "missing key without default must fail");
    }

    #[test]
    fn exists_and_getvs() {
        let store = seeded();
        let out = render_source(
            r#"{% if exists(key="/motd") %}yes{% endif %}:{{ getvs(pattern="/svc/*/port") | join(sep=",") }}"#,
            &store,
        )
        .expect("render");
        assert_eq!(out, "yes:5432,80");
    }

    #[test]
    fn ls_and_lsdir_list_children() {
        let store = seeded();
        let out = render_source(
            r#"{{ ls(prefix="/") | join(sep=",") }}|{{ lsdir(prefix="/") | join(sep=",") }}"#,
            &store,
        )
        .expect("render");
        assert_eq!(out, "motd,svc|svc");
    }

    #[test]
    fn getall_iterates_pairs_in_key_order() {
        let store = seeded();
        let out = render_source(
            r#"{% for pair in getall(prefix="/svc") %}{{ pair.key }}={{ pair.value }};{% endfor %}"#,
            &store,
        )
        .expect("render");
        assert_eq!(out, "/svc/db/port=5432;/svc/web/port=80;");
    }

    #[test]
    fn broken_template_surfaces_tera_error() {
        let store = seeded();
        let err = render_source(r#"{{ getv(key="/motd" }}"#, &store).expect_err("syntax error");
        assert!(matches!(err, RenderError::Tera(_)));
    }
}
