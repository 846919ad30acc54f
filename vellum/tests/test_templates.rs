use similar_asserts::assert_eq;
use vellum::value::Value;
use vellum::{context, Environment, Extension};

fn render(source: &str, ctx: Value) -> String {
    let env = Environment::new();
    env.render_str(source, ctx).unwrap()
}

#[test]
fn test_basic_rendering() {
    assert_eq!(
        render("Hello {{ name }}!", context!(name => "John Doe")),
        "Hello John Doe!"
    );
}

#[test]
fn test_expressions() {
    assert_eq!(render("{{ 1 + 2 * 3 }}", context!()), "7");
    assert_eq!(render("{{ 7 // 2 }}|{{ 7 % 2 }}|{{ 7 / 2 }}", context!()), "3|1|3.5");
    assert_eq!(render("{{ 2 ** 3 }}", context!()), "8");
    assert_eq!(render("{{ -2 ** 2 }}", context!()), "-4");
    assert_eq!(render("{{ 'a' ~ 1 ~ 'b' }}", context!()), "a1b");
    assert_eq!(render("{{ [1, 2, 3][1] }}", context!()), "2");
    assert_eq!(render("{{ {'a': 42}['a'] }}", context!()), "42");
    assert_eq!(render("{{ 'hello'[1:3] }}", context!()), "el");
    assert_eq!(render("{{ not false and 1 in [1, 2] }}", context!()), "true");
    assert_eq!(render("{{ 'big' if x > 10 else 'small' }}", context!(x => 42)), "big");
    assert_eq!(render("{{ 'big' if x > 10 }}", context!(x => 1)), "");
}

#[test]
fn test_chained_comparisons() {
    // these fold at compile time; behavior has to match runtime
    assert_eq!(render("{{ 1 < 2 < 3 }}", context!()), "true");
    assert_eq!(render("{{ 1 < 2 < 1 }}", context!()), "false");
    // with a variable the chain evaluates at runtime
    assert_eq!(render("{{ 1 < x < 3 }}", context!(x => 2)), "true");
    assert_eq!(render("{{ 1 < x < 3 }}", context!(x => 7)), "false");
    assert_eq!(render("{{ 1 <= x <= 1 }}", context!(x => 1)), "true");
}

#[test]
fn test_if_and_elif() {
    let tmpl = "{% if x > 10 %}big{% elif x > 5 %}medium{% else %}small{% endif %}";
    assert_eq!(render(tmpl, context!(x => 42)), "big");
    assert_eq!(render(tmpl, context!(x => 7)), "medium");
    assert_eq!(render(tmpl, context!(x => 1)), "small");
}

#[test]
fn test_for_loop_basics() {
    assert_eq!(
        render("{% for x in seq %}{{ x }};{% endfor %}", context!(seq => vec![1, 2, 3])),
        "1;2;3;"
    );
    assert_eq!(
        render("{% for x in [] %}{{ x }}{% else %}empty{% endfor %}", context!()),
        "empty"
    );
    assert_eq!(
        render(
            "{% for k, v in items %}{{ k }}={{ v }};{% endfor %}",
            context!(items => vec![vec![1, 2], vec![3, 4]])
        ),
        "1=2;3=4;"
    );
}

#[test]
fn test_loop_variable_and_triggers() {
    assert_eq!(
        render(
            "{% for i in seq %}{{ loop.index }}/{{ loop.length }};{% endfor %}",
            context!(seq => vec!["a", "b", "c"])
        ),
        "1/3;2/3;3/3;"
    );
    assert_eq!(
        render(
            "{% for i in [1, 2, 3] %}{{ loop.revindex }}{% endfor %}",
            context!()
        ),
        "321"
    );
    assert_eq!(
        render(
            "{% for i in [1, 2] %}{{ loop.first }},{{ loop.last }};{% endfor %}",
            context!()
        ),
        "true,false;false,true;"
    );
    assert_eq!(
        render(
            "{% for i in [1, 2, 3] %}{{ loop.previtem }}-{{ loop.nextitem }};{% endfor %}",
            context!()
        ),
        "-2;1-3;2-;"
    );
}

#[test]
fn test_loop_cycle_and_changed() {
    assert_eq!(
        render(
            "{% for i in range(4) %}{{ loop.cycle('a', 'b') }}{% endfor %}",
            context!()
        ),
        "abab"
    );
    assert_eq!(
        render(
            "{% for i in [1, 1, 2] %}{{ loop.changed(i) }}{% endfor %}",
            context!()
        ),
        "truefalsetrue"
    );
}

#[test]
fn test_loop_filter() {
    assert_eq!(
        render(
            "{% for i in range(6) if i is even %}{{ i }}/{{ loop.index }};{% endfor %}",
            context!()
        ),
        "0/1;2/2;4/3;"
    );
}

#[test]
fn test_loop_controls() {
    let mut env = Environment::new();
    env.add_extension(Extension::LoopControls);
    assert_eq!(
        env.render_str(
            "{% for i in range(10) %}{% if i == 3 %}{% break %}{% endif %}{{ i }}{% endfor %}",
            context!()
        )
        .unwrap(),
        "012"
    );
    assert_eq!(
        env.render_str(
            "{% for i in range(5) %}{% if i is odd %}{% continue %}{% endif %}{{ i }}{% endfor %}",
            context!()
        )
        .unwrap(),
        "024"
    );
}

#[test]
fn test_recursive_loop() {
    let ctx = serde_json::json!({
        "tree": [
            {"name": "a", "children": [
                {"name": "b", "children": []},
                {"name": "c", "children": [{"name": "d", "children": []}]},
            ]},
        ]
    });
    let env = Environment::new();
    assert_eq!(
        env.render_str(
            "{% for item in tree recursive %}{{ item.name }}{{ loop.depth }}{% if item.children %}<{{ loop(item.children) }}>{% endif %}{% endfor %}",
            &ctx
        )
        .unwrap(),
        "a1<b2c2<d3>>"
    );
}

#[test]
fn test_set_and_scoping() {
    assert_eq!(
        render("{% set x = 42 %}{{ x }}", context!()),
        "42"
    );
    // assignments in a loop body do not outlive the loop
    assert_eq!(
        render(
            "{% for i in [1] %}{% set x = i %}{% endfor %}{{ x|default('gone') }}",
            context!()
        ),
        "gone"
    );
    // the namespace escape hatch does
    assert_eq!(
        render(
            "{% set ns = namespace(x = 0) %}{% for i in [1, 2, 3] %}{% set ns.x = ns.x + i %}{% endfor %}{{ ns.x }}",
            context!()
        ),
        "6"
    );
}

#[test]
fn test_set_block() {
    assert_eq!(
        render("{% set x %}abc{% endset %}{{ x }}", context!()),
        "abc"
    );
    assert_eq!(
        render("{% set x | upper %}abc{% endset %}{{ x }}", context!()),
        "ABC"
    );
}

#[test]
fn test_with_block() {
    assert_eq!(
        render(
            "{% with a = 1, b = a + 1 %}{{ a }}{{ b }}{% endwith %}{{ a is defined }}",
            context!()
        ),
        "12false"
    );
}

#[test]
fn test_filter_block() {
    assert_eq!(
        render(
            "{% filter upper %}hello {{ 'world' }}{% endfilter %}",
            context!()
        ),
        "HELLO WORLD"
    );
}

#[test]
fn test_do_statement() {
    assert_eq!(render("{% do range(3) %}ok", context!()), "ok");
}

#[test]
fn test_autoescape() {
    let env = Environment::new();
    // scenario from the book: plain values escape, safe values pass
    assert_eq!(
        env.render_named_str(
            "t.html",
            "{{ s }}|{{ s|safe }}",
            context!(s => "<b>hi</b>")
        )
        .unwrap(),
        "&lt;b&gt;hi&lt;/b&gt;|<b>hi</b>"
    );
    // autoescape blocks override the template default
    assert_eq!(
        env.render_str(
            "{% autoescape true %}{{ '<x>' }}{% endautoescape %}|{{ '<x>' }}",
            context!()
        )
        .unwrap(),
        "&lt;x&gt;|<x>"
    );
    assert_eq!(
        env.render_named_str(
            "t.html",
            "{% autoescape false %}{{ '<x>' }}{% endautoescape %}",
            context!()
        )
        .unwrap(),
        "<x>"
    );
}

#[test]
fn test_escape_idempotent() {
    // escape(escape(x)) == escape(x)
    assert_eq!(
        render("{{ '<x>'|escape|escape }}", context!()),
        render("{{ '<x>'|escape }}", context!())
    );
}

#[test]
fn test_safe_concat_laws() {
    // concat of two safe strings is safe
    assert_eq!(
        render(
            "{{ ('<a>'|safe ~ '<b>'|safe) is safe }}",
            context!()
        ),
        "true"
    );
    // safe ~ plain escapes the plain side and stays safe
    assert_eq!(
        render("{{ '<a>'|safe ~ '<b>' }}", context!()),
        "<a>&lt;b&gt;"
    );
}

#[test]
fn test_native_types() {
    let env = Environment::new();
    let tmpl = env.template_from_str("{{ x + y }}").unwrap();
    let rv = tmpl.render_native(context!(x => 4, y => 2)).unwrap();
    assert_eq!(rv, Value::from(6));

    let tmpl = env
        .template_from_str("[{% for i in r %}{{ i + 1 }},{% endfor %}]")
        .unwrap();
    let rv = tmpl
        .render_native(context!(r => vec![0, 1, 2, 3, 4]))
        .unwrap();
    assert_eq!(
        rv,
        Value::from((1..=5).map(Value::from).collect::<Vec<_>>())
    );

    // anything that is not a constant stays a string
    let tmpl = env.template_from_str("hello {{ name }}").unwrap();
    let rv = tmpl.render_native(context!(name => "world")).unwrap();
    assert_eq!(rv, Value::from("hello world"));
}

#[test]
fn test_tuple_assignment_mismatch() {
    let env = Environment::new();
    let err = env
        .render_str("{% for a, b in [[1]] %}{% endfor %}", context!())
        .unwrap_err();
    assert_eq!(err.kind(), vellum::ErrorKind::InvalidOperation);
}

#[test]
fn test_line_statements() {
    let mut env = Environment::new();
    env.set_syntax(
        vellum::Syntax::default()
            .with_line_statement_prefix("#")
            .with_line_comment_prefix("##")
            .compile()
            .unwrap(),
    );
    assert_eq!(
        env.render_str("# for i in range(3)\n{{ i }}\n# endfor", context!())
            .unwrap(),
        "0\n1\n2\n"
    );
    assert_eq!(
        env.render_str("## just a comment\nx", context!()).unwrap(),
        "x"
    );
}

#[test]
fn test_custom_delimiters() {
    let mut env = Environment::new();
    env.set_syntax(
        vellum::Syntax::default()
            .with_variable_delimiters("${", "}")
            .compile()
            .unwrap(),
    );
    assert_eq!(
        env.render_str("${ 1 + 2 } {% if true %}yes{% endif %}", context!())
            .unwrap(),
        "3 yes"
    );
}

#[test]
fn test_raw_block() {
    assert_eq!(
        render("{% raw %}{{ not evaluated }}{% endraw %}", context!()),
        "{{ not evaluated }}"
    );
}

#[test]
fn test_finalize() {
    let mut env = Environment::new();
    env.set_finalize(|_state, value| {
        Ok(if value.is_none() {
            Value::from("")
        } else {
            value
        })
    });
    assert_eq!(
        env.render_str("{{ none }}x{{ 1 }}", context!()).unwrap(),
        "x1"
    );
}

#[test]
fn test_render_to_write() {
    let env = Environment::new();
    let tmpl = env.template_from_str("Hello {{ name }}!").unwrap();
    let mut buf = Vec::new();
    tmpl.render_to_write(context!(name => "IO"), &mut buf).unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), "Hello IO!");
}

#[test]
fn test_deterministic_render() {
    let env = Environment::new();
    let tmpl = env
        .template_from_str("{% for x in seq|sort %}{{ x }}{% endfor %}")
        .unwrap();
    let a = tmpl.render(context!(seq => vec![3, 1, 2])).unwrap();
    let b = tmpl.render(context!(seq => vec![3, 1, 2])).unwrap();
    assert_eq!(a, b);
    assert_eq!(a, "123");
}
