use similar_asserts::assert_eq;
use vellum::{context, Environment, ErrorKind, UndefinedBehavior};

fn env_with(behavior: UndefinedBehavior) -> Environment {
    let mut env = Environment::new();
    env.set_undefined_behavior(behavior);
    env
}

#[test]
fn test_lenient_undefined() {
    let env = env_with(UndefinedBehavior::Lenient);
    // printing, iteration and truth checks are tolerated
    assert_eq!(env.render_str("[{{ missing }}]", context!()).unwrap(), "[]");
    assert_eq!(
        env.render_str("{% for x in missing %}{{ x }}{% endfor %}ok", context!())
            .unwrap(),
        "ok"
    );
    assert_eq!(
        env.render_str("{% if missing %}a{% else %}b{% endif %}", context!())
            .unwrap(),
        "b"
    );
    // attribute access on an undefined fails
    let err = env.render_str("{{ missing.attr }}", context!()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedError);
}

#[test]
fn test_chainable_undefined() {
    let env = env_with(UndefinedBehavior::Chainable);
    assert_eq!(
        env.render_str("[{{ missing.deeply.nested[0] }}]", context!())
            .unwrap(),
        "[]"
    );
    assert_eq!(
        env.render_str("{{ missing.x is undefined }}", context!()).unwrap(),
        "true"
    );
}

#[test]
fn test_strict_undefined() {
    let env = env_with(UndefinedBehavior::Strict);
    let err = env.render_str("{{ missing }}", context!()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedError);

    let err = env
        .render_str("{% if missing %}{% endif %}", context!())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedError);

    let err = env
        .render_str("{% for x in missing %}{% endfor %}", context!())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedError);

    // presence tests never fail
    assert_eq!(
        env.render_str("{{ missing is defined }}", context!()).unwrap(),
        "false"
    );
}

#[test]
fn test_debug_undefined() {
    let env = env_with(UndefinedBehavior::Debug);
    assert_eq!(
        env.render_str("{{ missing }}", context!()).unwrap(),
        "{{ missing }}"
    );
}

#[test]
fn test_undefined_error_names_the_variable() {
    let env = env_with(UndefinedBehavior::Strict);
    let err = env.render_str("{{ missing }}", context!()).unwrap_err();
    assert!(err.to_string().contains("missing"));
}

#[test]
fn test_undefined_arithmetic_propagation() {
    let env = Environment::new();
    assert_eq!(env.render_str("{{ 1 + missing }}", context!()).unwrap(), "1");
    assert_eq!(env.render_str("{{ missing - 2 }}", context!()).unwrap(), "2");
    assert_eq!(env.render_str("[{{ 2 * missing }}]", context!()).unwrap(), "[]");
}

#[test]
fn test_undefined_comparisons() {
    let env = Environment::new();
    assert_eq!(
        env.render_str("{{ missing < 1 }}|{{ missing > 1 }}", context!())
            .unwrap(),
        "false|false"
    );
    let strict = env_with(UndefinedBehavior::Strict);
    let err = strict.render_str("{{ missing < 1 }}", context!()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedError);
}

#[test]
fn test_default_filter_interplay() {
    let env = env_with(UndefinedBehavior::Strict);
    // default() consumes the undefined before any strict failure
    assert_eq!(
        env.render_str("{{ missing|default('x') }}", context!()).unwrap(),
        "x"
    );
}

#[test]
fn test_missing_else_is_lenient() {
    // the implicit undefined of a missing else never fails, even in
    // strict mode
    let env = env_with(UndefinedBehavior::Strict);
    assert_eq!(
        env.render_str("[{{ 'x' if false }}]", context!()).unwrap(),
        "[]"
    );
}
