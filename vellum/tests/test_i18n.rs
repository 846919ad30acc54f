use similar_asserts::assert_eq;
use vellum::{context, Environment};

#[test]
fn test_trans_without_callbacks() {
    let env = Environment::new();
    assert_eq!(
        env.render_str(
            "{% trans name=user %}Hello {{ name }}!{% endtrans %}",
            context!(user => "World")
        )
        .unwrap(),
        "Hello World!"
    );
}

#[test]
fn test_trans_implicit_variables() {
    // names used in the body without an explicit binding resolve
    // against the context
    let env = Environment::new();
    assert_eq!(
        env.render_str(
            "{% trans %}Hello {{ user }}!{% endtrans %}",
            context!(user => "World")
        )
        .unwrap(),
        "Hello World!"
    );
}

#[test]
fn test_trans_gettext_hook() {
    let mut env = Environment::new();
    env.set_gettext_callback(|msg| match msg {
        "Hello %(name)s!" => "Hallo %(name)s!".to_string(),
        other => other.to_string(),
    });
    assert_eq!(
        env.render_str(
            "{% trans name=user %}Hello {{ name }}!{% endtrans %}",
            context!(user => "Welt")
        )
        .unwrap(),
        "Hallo Welt!"
    );
}

#[test]
fn test_pluralize() {
    let env = Environment::new();
    let tmpl = "{% trans count=n %}{{ count }} item{% pluralize %}{{ count }} items{% endtrans %}";
    assert_eq!(env.render_str(tmpl, context!(n => 1)).unwrap(), "1 item");
    assert_eq!(env.render_str(tmpl, context!(n => 3)).unwrap(), "3 items");
}

#[test]
fn test_ngettext_hook() {
    let mut env = Environment::new();
    env.set_ngettext_callback(|singular, plural, n| {
        let base = if n == 1 { singular } else { plural };
        format!("<{base}>")
    });
    let tmpl = "{% trans count=n %}{{ count }} item{% pluralize %}{{ count }} items{% endtrans %}";
    assert_eq!(env.render_str(tmpl, context!(n => 2)).unwrap(), "<2 items>");
}

#[test]
fn test_pluralize_explicit_counter() {
    let env = Environment::new();
    let tmpl = "{% trans apples=a, oranges=o %}{{ apples }} apples{% pluralize oranges %}{{ oranges }} oranges{% endtrans %}";
    assert_eq!(
        env.render_str(tmpl, context!(a => 1, o => 5)).unwrap(),
        "5 oranges"
    );
}

#[test]
fn test_trimmed_modifier() {
    let env = Environment::new();
    assert_eq!(
        env.render_str(
            "{% trans trimmed %}  hello\n    big\n  world  {% endtrans %}",
            context!()
        )
        .unwrap(),
        "hello big world"
    );
}

#[test]
fn test_trimmed_policy() {
    let mut env = Environment::new();
    env.policies_mut().i18n_trimmed = true;
    assert_eq!(
        env.render_str(
            "{% trans %}  spaced\n  out  {% endtrans %}",
            context!()
        )
        .unwrap(),
        "spaced out"
    );
}

#[test]
fn test_trans_escapes_interpolations() {
    let env = Environment::new();
    assert_eq!(
        env.render_named_str(
            "t.html",
            "{% trans name=user %}Hi {{ name }}{% endtrans %}",
            context!(user => "<admin>")
        )
        .unwrap(),
        "Hi &lt;admin&gt;"
    );
}

#[test]
fn test_trans_rejects_complex_expressions() {
    let env = Environment::new();
    let err = env
        .render_str("{% trans %}{{ user.name }}{% endtrans %}", context!())
        .unwrap_err();
    assert_eq!(err.kind(), vellum::ErrorKind::SyntaxError);
}
