/// Creates a template context from `key => value` pairs.
///
/// Values can be anything serializable:
///
/// ```
/// use vellum::{context, Environment};
///
/// let env = Environment::new();
/// let rv = env.render_str(
///     "{{ name }} has {{ items|length }} items",
///     context! { name => "Bob", items => vec![1, 2, 3] },
/// );
/// assert_eq!(rv.unwrap(), "Bob has 3 items");
/// ```
#[macro_export]
macro_rules! context {
    () => {
        $crate::value::Value::UNDEFINED
    };
    ($($key:ident => $value:expr),* $(,)?) => {{
        let mut ctx = ::std::collections::BTreeMap::<&str, $crate::value::Value>::new();
        $(
            ctx.insert(stringify!($key), $crate::value::Value::from_serialize(&$value));
        )*
        $crate::value::Value::from_serialize(ctx)
    }};
}
