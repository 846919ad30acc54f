use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use similar_asserts::assert_eq;
use vellum::bytecode::{CacheBucket, CompiledTemplateCache, MemoryCache};
use vellum::loader::{ChainLoader, DictLoader, Loader, TemplateSource};
use vellum::value::Value;
use vellum::{context, Environment, ErrorKind};

#[test]
fn test_loader_basics() {
    let mut env = Environment::new();
    env.set_loader(DictLoader::new([
        ("index.txt", "hello {{ name }}"),
        ("other.txt", "other"),
    ]));
    assert_eq!(
        env.get_template("index.txt")
            .unwrap()
            .render(context!(name => "x"))
            .unwrap(),
        "hello x"
    );
    assert_eq!(
        env.get_template("missing.txt").unwrap_err().kind(),
        ErrorKind::TemplateNotFound
    );
    assert_eq!(env.list_templates(), vec!["index.txt", "other.txt"]);
}

#[test]
fn test_function_loader() {
    let mut env = Environment::new();
    env.set_loader(|name: &str| {
        if name == "gen.txt" {
            Ok(Some("generated".to_string()))
        } else {
            Ok(None)
        }
    });
    assert_eq!(
        env.get_template("gen.txt").unwrap().render(context!()).unwrap(),
        "generated"
    );
    assert!(env.get_template("other.txt").is_err());
}

#[test]
fn test_chain_loader() {
    let mut env = Environment::new();
    env.set_loader(ChainLoader::new(vec![
        Arc::new(DictLoader::new([("a.txt", "first a")])),
        Arc::new(DictLoader::new([("a.txt", "second a"), ("b.txt", "b")])),
    ]));
    assert_eq!(
        env.get_template("a.txt").unwrap().render(context!()).unwrap(),
        "first a"
    );
    assert_eq!(
        env.get_template("b.txt").unwrap().render(context!()).unwrap(),
        "b"
    );
}

struct ReloadingLoader {
    calls: Arc<AtomicUsize>,
    uptodate: Arc<AtomicBool>,
}

impl Loader for ReloadingLoader {
    fn get_source(&self, name: &str) -> Result<TemplateSource, vellum::Error> {
        let count = self.calls.fetch_add(1, Ordering::SeqCst);
        let uptodate = self.uptodate.clone();
        Ok(TemplateSource {
            source: format!("version {count} of {name}"),
            filename: None,
            uptodate: Some(Box::new(move || uptodate.load(Ordering::SeqCst))),
        })
    }
}

#[test]
fn test_uptodate_invalidation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let uptodate = Arc::new(AtomicBool::new(true));
    let mut env = Environment::new();
    env.set_loader(ReloadingLoader {
        calls: calls.clone(),
        uptodate: uptodate.clone(),
    });

    assert_eq!(
        env.get_template("t").unwrap().render(context!()).unwrap(),
        "version 0 of t"
    );
    // a cache hit while the probe reports fresh
    assert_eq!(
        env.get_template("t").unwrap().render(context!()).unwrap(),
        "version 0 of t"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // stale entries recompile
    uptodate.store(false, Ordering::SeqCst);
    assert_eq!(
        env.get_template("t").unwrap().render(context!()).unwrap(),
        "version 1 of t"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_clear_caches() {
    let calls = Arc::new(AtomicUsize::new(0));
    let uptodate = Arc::new(AtomicBool::new(true));
    let mut env = Environment::new();
    env.set_loader(ReloadingLoader {
        calls: calls.clone(),
        uptodate,
    });
    env.get_template("t").unwrap();
    env.clear_caches();
    env.get_template("t").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

struct SpyCache {
    inner: MemoryCache,
    loads: AtomicUsize,
    stores: AtomicUsize,
}

impl CompiledTemplateCache for SpyCache {
    fn load(&self, bucket: &mut CacheBucket) {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(bucket);
    }

    fn store(&self, bucket: &CacheBucket) {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.inner.store(bucket);
    }
}

#[test]
fn test_compiled_template_cache_roundtrip() {
    let cache = Arc::new(SpyCache {
        inner: MemoryCache::default(),
        loads: AtomicUsize::new(0),
        stores: AtomicUsize::new(0),
    });

    let make_env = |cache: Arc<SpyCache>| {
        let mut env = Environment::new();
        env.set_loader(DictLoader::new([(
            "page.txt",
            "{% for x in seq %}{{ x }}{% endfor %}",
        )]));
        env.set_compiled_template_cache(cache);
        env
    };

    let env1 = make_env(cache.clone());
    assert_eq!(
        env1.get_template("page.txt")
            .unwrap()
            .render(context!(seq => vec![1, 2, 3]))
            .unwrap(),
        "123"
    );
    assert_eq!(cache.stores.load(Ordering::SeqCst), 1);

    // a second environment with identical configuration deserializes
    // the compiled program instead of compiling
    let env2 = make_env(cache.clone());
    assert_eq!(
        env2.get_template("page.txt")
            .unwrap()
            .render(context!(seq => vec![1, 2, 3]))
            .unwrap(),
        "123"
    );
    assert_eq!(cache.loads.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stores.load(Ordering::SeqCst), 1);
}

#[test]
fn test_custom_filter_and_test() {
    let mut env = Environment::new();
    env.add_filter("shout", |_state: &vellum::State, args: &[Value]| {
        Ok(Value::from(format!("{}!!!", args[0])))
    });
    env.add_test("big", |_state: &vellum::State, args: &[Value]| {
        Ok(Value::from(args[0].as_i64().unwrap_or(0) > 100))
    });
    assert_eq!(
        env.render_str("{{ 'hey'|shout }} {{ 1000 is big }}", context!())
            .unwrap(),
        "hey!!! true"
    );
}

#[test]
fn test_custom_function_and_global() {
    let mut env = Environment::new();
    env.add_function("double", |_state: &vellum::State, args: &[Value]| {
        Ok(Value::from(args[0].as_i64().unwrap_or(0) * 2))
    });
    env.add_global("version", 3);
    assert_eq!(
        env.render_str("{{ double(21) }}/{{ version }}", context!())
            .unwrap(),
        "42/3"
    );
}

#[test]
fn test_expression_api() {
    let env = Environment::new();
    let expr = env.compile_expression("values|sort|first + offset").unwrap();
    let rv = expr
        .eval(context!(values => vec![3, 1, 2], offset => 10))
        .unwrap();
    assert_eq!(rv, Value::from(11));
}

#[test]
fn test_policies() {
    let mut env = Environment::new();
    env.policies_mut().truncate_leeway = 0;
    assert_eq!(
        env.render_str("{{ 'hello world!'|truncate(5) }}", context!())
            .unwrap(),
        "he..."
    );

    let mut env = Environment::new();
    env.policies_mut().urlize_target = Some("_blank".to_string());
    let rv = env
        .render_str("{{ 'see https://example.com now'|urlize }}", context!())
        .unwrap();
    assert!(rv.contains("target=\"_blank\""));
    assert!(rv.contains("rel=\"noopener\""));
}

#[test]
fn test_json_auto_escape() {
    let env = Environment::new();
    let ctx = serde_json::json!({"x": {"a": 1, "b": [true, null]}});
    assert_eq!(
        env.render_named_str("c.json", "{{ x }}", &ctx).unwrap(),
        "{\"a\":1,\"b\":[true,null]}"
    );
}

#[test]
fn test_error_metadata() {
    let env = Environment::new();
    let err = env
        .render_named_str("bad.txt", "line one\n{{ 1 / 0 }}", context!())
        .unwrap_err();
    assert_eq!(err.name(), Some("bad.txt"));
    assert_eq!(err.line(), Some(2));
    insta::assert_snapshot!(
        err.to_string(),
        @"invalid operation: division by zero (in bad.txt:2)"
    );
}

#[test]
fn test_syntax_error_message() {
    let env = Environment::new();
    let err = env.render_str("{% for %}", context!()).unwrap_err();
    insta::assert_snapshot!(
        err.to_string(),
        @"syntax error: unexpected end of block, expected in (in <string>:1)"
    );
}

#[test]
fn test_sandbox() {
    let mut env = Environment::new();
    env.set_sandbox(vellum::sandbox::DefaultSandbox);
    let ctx = serde_json::json!({"func": {}});
    let err = env.render_str("{{ func.__code__ }}", &ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityError);
    assert!(err.to_string().contains("__code__"));

    // item access with a string key goes through the same policy
    let err = env.render_str("{{ func['__globals__'] }}", &ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityError);

    // plain access still works
    assert_eq!(
        env.render_str("{{ user.name }}", serde_json::json!({"user": {"name": "x"}}))
            .unwrap(),
        "x"
    );
}

#[test]
fn test_sandbox_operator_interception() {
    let mut env = Environment::new();
    env.set_sandbox(vellum::sandbox::LimitedPowSandbox { max_exponent: 8 });
    assert_eq!(env.render_str("{{ 2 ** 8 }}", context!()).unwrap(), "256");
    let err = env.render_str("{{ 2 ** 9 }}", context!()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityError);
}
