use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::filters::{self, BoxedFilter};
use crate::functions::{self, BoxedFunction};
use crate::tests::{self, BoxedTest};
use crate::utils::AutoEscape;
use crate::value::Value;

pub(crate) fn no_auto_escape(_: &str) -> AutoEscape {
    AutoEscape::None
}

/// The default logic for auto escaping based on file extension.
///
/// * [`Html`](AutoEscape::Html): `.html`, `.htm`, `.xml`
/// * [`Json`](AutoEscape::Json): `.json`, `.js`, `.yaml`, `.yml`
/// * [`None`](AutoEscape::None): _all others_
pub fn default_auto_escape_callback(name: &str) -> AutoEscape {
    match name.rsplit('.').next() {
        Some("html" | "htm" | "xml") => AutoEscape::Html,
        Some("json" | "js" | "yaml" | "yml") => AutoEscape::Json,
        _ => AutoEscape::None,
    }
}

pub(crate) fn get_builtin_filters() -> BTreeMap<Cow<'static, str>, BoxedFilter> {
    let mut rv = BTreeMap::new();
    rv.insert("safe".into(), BoxedFilter::new(filters::safe));
    let escape = BoxedFilter::new(filters::escape);
    rv.insert("escape".into(), escape.clone());
    rv.insert("e".into(), escape);
    rv.insert("forceescape".into(), BoxedFilter::new(filters::forceescape));
    rv.insert("upper".into(), BoxedFilter::new(filters::upper));
    rv.insert("lower".into(), BoxedFilter::new(filters::lower));
    rv.insert("title".into(), BoxedFilter::new(filters::title));
    rv.insert("capitalize".into(), BoxedFilter::new(filters::capitalize));
    rv.insert("trim".into(), BoxedFilter::new(filters::trim));
    rv.insert("striptags".into(), BoxedFilter::new(filters::striptags));
    rv.insert("truncate".into(), BoxedFilter::new(filters::truncate));
    rv.insert("wordcount".into(), BoxedFilter::new(filters::wordcount));
    rv.insert("wordwrap".into(), BoxedFilter::new(filters::wordwrap));
    rv.insert("replace".into(), BoxedFilter::new(filters::replace));
    rv.insert("center".into(), BoxedFilter::new(filters::center));
    rv.insert("indent".into(), BoxedFilter::new(filters::indent));
    rv.insert("urlize".into(), BoxedFilter::new(filters::urlize));
    rv.insert("urlencode".into(), BoxedFilter::new(filters::urlencode));
    rv.insert("format".into(), BoxedFilter::new(filters::format));
    rv.insert("string".into(), BoxedFilter::new(filters::string));
    rv.insert("bool".into(), BoxedFilter::new(filters::bool));
    let length = BoxedFilter::new(filters::length);
    rv.insert("length".into(), length.clone());
    rv.insert("count".into(), length);
    rv.insert("first".into(), BoxedFilter::new(filters::first));
    rv.insert("last".into(), BoxedFilter::new(filters::last));
    rv.insert("min".into(), BoxedFilter::new(filters::min));
    rv.insert("max".into(), BoxedFilter::new(filters::max));
    rv.insert("sum".into(), BoxedFilter::new(filters::sum));
    rv.insert("sort".into(), BoxedFilter::new(filters::sort));
    rv.insert("reverse".into(), BoxedFilter::new(filters::reverse));
    rv.insert("unique".into(), BoxedFilter::new(filters::unique));
    rv.insert("groupby".into(), BoxedFilter::new(filters::groupby));
    rv.insert("batch".into(), BoxedFilter::new(filters::batch));
    rv.insert("slice".into(), BoxedFilter::new(filters::slice));
    rv.insert("join".into(), BoxedFilter::new(filters::join));
    rv.insert("list".into(), BoxedFilter::new(filters::list));
    rv.insert("map".into(), BoxedFilter::new(filters::map));
    rv.insert("select".into(), BoxedFilter::new(filters::select));
    rv.insert("reject".into(), BoxedFilter::new(filters::reject));
    rv.insert("selectattr".into(), BoxedFilter::new(filters::selectattr));
    rv.insert("rejectattr".into(), BoxedFilter::new(filters::rejectattr));
    rv.insert("dictsort".into(), BoxedFilter::new(filters::dictsort));
    rv.insert("items".into(), BoxedFilter::new(filters::items));
    rv.insert("abs".into(), BoxedFilter::new(filters::abs));
    rv.insert("round".into(), BoxedFilter::new(filters::round));
    rv.insert("int".into(), BoxedFilter::new(filters::int));
    rv.insert("float".into(), BoxedFilter::new(filters::float));
    rv.insert(
        "filesizeformat".into(),
        BoxedFilter::new(filters::filesizeformat),
    );
    rv.insert("tojson".into(), BoxedFilter::new(filters::tojson));
    rv.insert("pprint".into(), BoxedFilter::new(filters::pprint));
    rv.insert("xmlattr".into(), BoxedFilter::new(filters::xmlattr));
    rv.insert("attr".into(), BoxedFilter::new(filters::attr));
    let default = BoxedFilter::new(filters::default);
    rv.insert("default".into(), default.clone());
    rv.insert("d".into(), default);
    rv.insert("random".into(), BoxedFilter::new(filters::random));
    rv
}

pub(crate) fn get_builtin_tests() -> BTreeMap<Cow<'static, str>, BoxedTest> {
    let mut rv = BTreeMap::new();
    rv.insert("defined".into(), BoxedTest::new(tests::is_defined));
    rv.insert("undefined".into(), BoxedTest::new(tests::is_undefined));
    rv.insert("none".into(), BoxedTest::new(tests::is_none));
    rv.insert("boolean".into(), BoxedTest::new(tests::is_boolean));
    rv.insert("true".into(), BoxedTest::new(tests::is_true));
    rv.insert("false".into(), BoxedTest::new(tests::is_false));
    rv.insert("string".into(), BoxedTest::new(tests::is_string));
    rv.insert("number".into(), BoxedTest::new(tests::is_number));
    rv.insert("integer".into(), BoxedTest::new(tests::is_integer));
    rv.insert("float".into(), BoxedTest::new(tests::is_float));
    rv.insert("sequence".into(), BoxedTest::new(tests::is_sequence));
    rv.insert("mapping".into(), BoxedTest::new(tests::is_mapping));
    rv.insert("iterable".into(), BoxedTest::new(tests::is_iterable));
    rv.insert("callable".into(), BoxedTest::new(tests::is_callable));
    rv.insert("sameas".into(), BoxedTest::new(tests::is_sameas));
    rv.insert("divisibleby".into(), BoxedTest::new(tests::is_divisibleby));
    rv.insert("odd".into(), BoxedTest::new(tests::is_odd));
    rv.insert("even".into(), BoxedTest::new(tests::is_even));
    rv.insert("lower".into(), BoxedTest::new(tests::is_lower));
    rv.insert("upper".into(), BoxedTest::new(tests::is_upper));
    let is_safe = BoxedTest::new(tests::is_safe);
    rv.insert("safe".into(), is_safe.clone());
    rv.insert("escaped".into(), is_safe);
    rv.insert(
        "startingwith".into(),
        BoxedTest::new(tests::is_startingwith),
    );
    rv.insert("endingwith".into(), BoxedTest::new(tests::is_endingwith));

    // operators
    let is_eq = BoxedTest::new(tests::is_eq);
    rv.insert("eq".into(), is_eq.clone());
    rv.insert("equalto".into(), is_eq.clone());
    rv.insert("==".into(), is_eq);
    let is_ne = BoxedTest::new(tests::is_ne);
    rv.insert("ne".into(), is_ne.clone());
    rv.insert("!=".into(), is_ne);
    let is_lt = BoxedTest::new(tests::is_lt);
    rv.insert("lt".into(), is_lt.clone());
    rv.insert("lessthan".into(), is_lt.clone());
    rv.insert("<".into(), is_lt);
    let is_le = BoxedTest::new(tests::is_le);
    rv.insert("le".into(), is_le.clone());
    rv.insert("<=".into(), is_le);
    let is_gt = BoxedTest::new(tests::is_gt);
    rv.insert("gt".into(), is_gt.clone());
    rv.insert("greaterthan".into(), is_gt.clone());
    rv.insert(">".into(), is_gt);
    let is_ge = BoxedTest::new(tests::is_ge);
    rv.insert("ge".into(), is_ge.clone());
    rv.insert(">=".into(), is_ge);
    rv.insert("in".into(), BoxedTest::new(tests::is_in));
    rv
}

pub(crate) fn get_globals() -> BTreeMap<Cow<'static, str>, Value> {
    let mut rv = BTreeMap::new();
    rv.insert(
        "range".into(),
        BoxedFunction::new("range".into(), functions::range).to_value(),
    );
    rv.insert(
        "dict".into(),
        BoxedFunction::new("dict".into(), functions::dict).to_value(),
    );
    rv.insert(
        "namespace".into(),
        BoxedFunction::new("namespace".into(), functions::namespace).to_value(),
    );
    rv.insert(
        "cycler".into(),
        BoxedFunction::new("cycler".into(), functions::cycler).to_value(),
    );
    rv.insert(
        "joiner".into(),
        BoxedFunction::new("joiner".into(), functions::joiner).to_value(),
    );
    rv.insert(
        "debug".into(),
        BoxedFunction::new("debug".into(), functions::debug).to_value(),
    );
    rv
}
