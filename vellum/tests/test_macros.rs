use similar_asserts::assert_eq;
use vellum::{context, Environment, ErrorKind};

fn render(source: &str) -> String {
    let env = Environment::new();
    env.render_str(source, context!()).unwrap()
}

#[test]
fn test_basic_macro() {
    assert_eq!(
        render(
            "{% macro greet(name, greeting='Hello') %}{{ greeting }} {{ name }}!{% endmacro %}\
             {{ greet('Peter') }} {{ greet('Max', greeting='Hi') }}"
        ),
        "Hello Peter! Hi Max!"
    );
}

#[test]
fn test_macro_varargs_and_kwargs() {
    assert_eq!(
        render("{% macro m() %}{{ varargs|join(',') }}{% endmacro %}{{ m(1, 2, 3) }}"),
        "1,2,3"
    );
    assert_eq!(
        render("{% macro m() %}{{ kwargs['x'] }}{% endmacro %}{{ m(x=42) }}"),
        "42"
    );
}

#[test]
fn test_macro_argument_errors() {
    let env = Environment::new();
    let err = env
        .render_str("{% macro m(a) %}{{ a }}{% endmacro %}{{ m() }}", context!())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArguments);

    let err = env
        .render_str(
            "{% macro m(a) %}{{ a }}{% endmacro %}{{ m(1, a=2) }}",
            context!(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArguments);

    // extra keyword arguments fail unless the macro uses kwargs
    let err = env
        .render_str(
            "{% macro m(a) %}{{ a }}{% endmacro %}{{ m(1, b=2) }}",
            context!(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArguments);
}

#[test]
fn test_macro_closure() {
    // macros observe later assignments on their declaration level
    assert_eq!(
        render(
            "{% set who = 'world' %}{% macro hi() %}hi {{ who }}{% endmacro %}\
             {% set who = 'there' %}{{ hi() }}"
        ),
        "hi there"
    );
}

#[test]
fn test_macro_recursion() {
    assert_eq!(
        render(
            "{% macro fact(n) %}{% if n <= 1 %}1{% else %}{{ n }}*{{ fact(n - 1) }}{% endif %}{% endmacro %}{{ fact(3) }}"
        ),
        "3*2*1"
    );
}

#[test]
fn test_macro_attributes() {
    assert_eq!(
        render(
            "{% macro m(a, b) %}{% endmacro %}{{ m.name }}/{{ m.arguments|join(',') }}/{{ m.caller }}"
        ),
        "m/a,b/false"
    );
}

#[test]
fn test_call_block() {
    assert_eq!(
        render(
            "{% macro dialog(title) %}<div>{{ title }}: {{ caller() }}</div>{% endmacro %}\
             {% call dialog('Hi') %}Body{% endcall %}"
        ),
        "<div>Hi: Body</div>"
    );
}

#[test]
fn test_call_block_with_arguments() {
    assert_eq!(
        render(
            "{% macro list(items) %}{% for item in items %}{{ caller(item) }};{% endfor %}{% endmacro %}\
             {% call(item) list([1, 2]) %}got {{ item }}{% endcall %}"
        ),
        "got 1;got 2;"
    );
}

#[test]
fn test_caller_outside_call_block_rejected() {
    let env = Environment::new();
    // a macro that never references caller refuses an explicit one
    let err = env
        .render_str(
            "{% macro m(a) %}{{ a }}{% endmacro %}{{ m(1, caller=2) }}",
            context!(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArguments);
}

#[test]
fn test_import() {
    let mut env = Environment::new();
    env.add_template(
        "helpers.txt",
        "{% macro say(n) %}Hi {{ n }}{% endmacro %}{% set version = 2 %}",
    )
    .unwrap();
    env.add_template(
        "page.txt",
        "{% import 'helpers.txt' as h %}{{ h.say('x') }} v{{ h.version }}",
    )
    .unwrap();
    assert_eq!(
        env.get_template("page.txt").unwrap().render(context!()).unwrap(),
        "Hi x v2"
    );
}

#[test]
fn test_from_import() {
    let mut env = Environment::new();
    env.add_template(
        "helpers.txt",
        "{% macro say(n) %}Hi {{ n }}{% endmacro %}",
    )
    .unwrap();
    env.add_template(
        "page.txt",
        "{% from 'helpers.txt' import say as greet %}{{ greet('y') }}",
    )
    .unwrap();
    assert_eq!(
        env.get_template("page.txt").unwrap().render(context!()).unwrap(),
        "Hi y"
    );
}

#[test]
fn test_import_context_visibility() {
    let mut env = Environment::new();
    env.add_template("mod.txt", "{% set rv = name|default('hidden') %}").unwrap();
    env.add_template(
        "implicit.txt",
        "{% import 'mod.txt' as m %}{{ m.rv }}",
    )
    .unwrap();
    env.add_template(
        "explicit.txt",
        "{% import 'mod.txt' as m with context %}{{ m.rv }}",
    )
    .unwrap();
    // imports do not see the render context by default
    assert_eq!(
        env.get_template("implicit.txt")
            .unwrap()
            .render(context!(name => "seen"))
            .unwrap(),
        "hidden"
    );
    assert_eq!(
        env.get_template("explicit.txt")
            .unwrap()
            .render(context!(name => "seen"))
            .unwrap(),
        "seen"
    );
}

#[test]
fn test_macro_in_autoescape() {
    let env = Environment::new();
    // macro output is marked safe so it does not get double escaped
    assert_eq!(
        env.render_named_str(
            "t.html",
            "{% macro tag(v) %}<b>{{ v }}</b>{% endmacro %}{{ tag('x & y') }}",
            context!()
        )
        .unwrap(),
        "<b>x &amp; y</b>"
    );
}
