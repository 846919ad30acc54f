use similar_asserts::assert_eq;
use vellum::{context, Environment, ErrorKind};

#[test]
fn test_basic_inheritance_with_super() {
    let mut env = Environment::new();
    env.add_template("base.html", "[{% block x %}B{% endblock %}]")
        .unwrap();
    env.add_template(
        "child.html",
        "{% extends \"base.html\" %}{% block x %}{{ super() }}C{% endblock %}",
    )
    .unwrap();
    let tmpl = env.get_template("child.html").unwrap();
    assert_eq!(tmpl.render(context!()).unwrap(), "[BC]");
}

#[test]
fn test_three_level_chain() {
    let mut env = Environment::new();
    env.add_template("base.html", "[{% block x %}B{% endblock %}]")
        .unwrap();
    env.add_template(
        "child.html",
        "{% extends 'base.html' %}{% block x %}{{ super() }}C{% endblock %}",
    )
    .unwrap();
    env.add_template(
        "grandchild.html",
        "{% extends 'child.html' %}{% block x %}{{ super.super() }}|{{ super() }}|G{% endblock %}",
    )
    .unwrap();
    let tmpl = env.get_template("grandchild.html").unwrap();
    assert_eq!(tmpl.render(context!()).unwrap(), "[B|BC|G]");
}

#[test]
fn test_unmodified_blocks_come_from_parent() {
    let mut env = Environment::new();
    env.add_template(
        "base.txt",
        "{% block a %}A{% endblock %}-{% block b %}B{% endblock %}",
    )
    .unwrap();
    env.add_template(
        "child.txt",
        "{% extends 'base.txt' %}{% block b %}Bee{% endblock %}",
    )
    .unwrap();
    assert_eq!(
        env.get_template("child.txt").unwrap().render(context!()).unwrap(),
        "A-Bee"
    );
}

#[test]
fn test_dynamic_extends() {
    let mut env = Environment::new();
    env.add_template("a.txt", "A{% block x %}{% endblock %}").unwrap();
    env.add_template("b.txt", "B{% block x %}{% endblock %}").unwrap();
    env.add_template(
        "child.txt",
        "{% extends parent %}{% block x %}!{% endblock %}",
    )
    .unwrap();
    let tmpl = env.get_template("child.txt").unwrap();
    assert_eq!(tmpl.render(context!(parent => "a.txt")).unwrap(), "A!");
    assert_eq!(tmpl.render(context!(parent => "b.txt")).unwrap(), "B!");
}

#[test]
fn test_self_extension_fails() {
    let mut env = Environment::new();
    env.add_template("loop.txt", "{% extends 'loop.txt' %}").unwrap();
    let err = env
        .get_template("loop.txt")
        .unwrap()
        .render(context!())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
}

#[test]
fn test_content_after_extends_is_discarded() {
    let mut env = Environment::new();
    env.add_template("base.txt", "parent").unwrap();
    env.add_template("child.txt", "{% extends 'base.txt' %}stray content")
        .unwrap();
    assert_eq!(
        env.get_template("child.txt").unwrap().render(context!()).unwrap(),
        "parent"
    );
}

#[test]
fn test_self_block_reference() {
    let env = Environment::new();
    assert_eq!(
        env.render_str(
            "{% block title %}The Title{% endblock %}={{ self.title() }}",
            context!()
        )
        .unwrap(),
        "The Title=The Title"
    );
}

#[test]
fn test_scoped_blocks() {
    let env = Environment::new();
    // a scoped block sees the loop variables of its render site
    assert_eq!(
        env.render_str(
            "{% for i in [1, 2] %}{% block item scoped %}{{ i }}{% endblock %}{% endfor %}",
            context!()
        )
        .unwrap(),
        "12"
    );
    // an unscoped block does not
    assert_eq!(
        env.render_str(
            "{% for i in [1, 2] %}{% block item %}{{ i|default('?') }}{% endblock %}{% endfor %}",
            context!()
        )
        .unwrap(),
        "??"
    );
    // module level variables stay visible either way
    assert_eq!(
        env.render_str(
            "{% set greeting = 'hi' %}{% block b %}{{ greeting }}{% endblock %}",
            context!()
        )
        .unwrap(),
        "hi"
    );
}

#[test]
fn test_required_blocks() {
    let mut env = Environment::new();
    env.add_template(
        "base.txt",
        "{% block content required %}{% endblock %}",
    )
    .unwrap();
    env.add_template(
        "good.txt",
        "{% extends 'base.txt' %}{% block content %}ok{% endblock %}",
    )
    .unwrap();
    assert_eq!(
        env.get_template("good.txt").unwrap().render(context!()).unwrap(),
        "ok"
    );
    let err = env
        .get_template("base.txt")
        .unwrap()
        .render(context!())
        .unwrap_err();
    assert!(err.to_string().contains("required block"));
}

#[test]
fn test_include() {
    let mut env = Environment::new();
    env.add_template("header.txt", "{{ greeting }} {{ name }}").unwrap();
    env.add_template(
        "page.txt",
        "{% set greeting = 'Hello' %}<{% include 'header.txt' %}>",
    )
    .unwrap();
    assert_eq!(
        env.get_template("page.txt")
            .unwrap()
            .render(context!(name => "World"))
            .unwrap(),
        "<Hello World>"
    );
}

#[test]
fn test_include_without_context() {
    let mut env = Environment::new();
    env.add_template("header.txt", "[{{ name|default('nobody') }}]").unwrap();
    env.add_template("page.txt", "{% include 'header.txt' without context %}")
        .unwrap();
    assert_eq!(
        env.get_template("page.txt")
            .unwrap()
            .render(context!(name => "World"))
            .unwrap(),
        "[nobody]"
    );
}

#[test]
fn test_include_missing() {
    let mut env = Environment::new();
    env.add_template("page.txt", "a{% include 'nope.txt' ignore missing %}b")
        .unwrap();
    assert_eq!(
        env.get_template("page.txt").unwrap().render(context!()).unwrap(),
        "ab"
    );

    env.add_template("bad.txt", "{% include 'nope.txt' %}").unwrap();
    let err = env
        .get_template("bad.txt")
        .unwrap()
        .render(context!())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
}

#[test]
fn test_include_choices() {
    let mut env = Environment::new();
    env.add_template("second.txt", "2nd").unwrap();
    env.add_template(
        "page.txt",
        "{% include ['first.txt', 'second.txt'] %}",
    )
    .unwrap();
    assert_eq!(
        env.get_template("page.txt").unwrap().render(context!()).unwrap(),
        "2nd"
    );

    env.add_template("bad.txt", "{% include ['a.txt', 'b.txt'] %}").unwrap();
    let err = env
        .get_template("bad.txt")
        .unwrap()
        .render(context!())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplatesNotFound);
}

#[test]
fn test_include_inherits_autoescape_of_target() {
    let mut env = Environment::new();
    env.add_template("part.html", "{{ v }}").unwrap();
    env.add_template("page.txt", "{% include 'part.html' %}|{{ v }}").unwrap();
    assert_eq!(
        env.get_template("page.txt")
            .unwrap()
            .render(context!(v => "<x>"))
            .unwrap(),
        "&lt;x&gt;|<x>"
    );
}
