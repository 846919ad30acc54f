use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::bytecode::{CacheBucket, CompiledTemplateCache};
use crate::cache::LruCache;
use crate::error::Error;
use crate::eval::State;
use crate::expression::Expression;
use crate::filters::BoxedFilter;
use crate::i18n::{GettextCallback, I18nCallbacks, NgettextCallback};
use crate::loader::{Loader, UptodateProbe};
use crate::output::Output;
use crate::parser::{self, CompileOptions};
use crate::program::CompiledTemplate;
use crate::sandbox::SandboxPolicy;
use crate::syntax::SyntaxConfig;
use crate::template::Template;
use crate::tests::BoxedTest;
use crate::utils::{write_escaped, AutoEscape, UndefinedBehavior};
use crate::value::{UndefinedKind, Value};
use crate::{defaults, optimizer};

type AutoEscapeFunc = dyn Fn(&str) -> AutoEscape + Sync + Send;
type FinalizeFunc = dyn Fn(&State, Value) -> Result<Value, Error> + Sync + Send;
type JsonDumpsFunc = dyn Fn(&Value) -> Result<String, Error> + Sync + Send;

/// The default runtime recursion limit.
const MAX_RECURSION: usize = 500;

/// The default capacity of the loaded-template cache.
const DEFAULT_TEMPLATE_CACHE_SIZE: usize = 400;

/// Optional language extensions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Extension {
    /// Enables `{% break %}` and `{% continue %}` in loops.
    LoopControls,
}

/// Tunable behaviors of built-in filters and the i18n machinery.
#[derive(Clone)]
pub struct Policies {
    /// `truncate` may overshoot its length by this many characters
    /// before actually cutting.
    pub truncate_leeway: usize,
    /// The `rel` attribute `urlize` puts on generated links.
    pub urlize_rel: String,
    /// The `target` attribute `urlize` puts on generated links.
    pub urlize_target: Option<String>,
    /// URL schemes `urlize` recognizes in addition to `http://`,
    /// `https://` and `mailto:`.
    pub urlize_extra_schemes: Vec<String>,
    /// Collapse whitespace in every translation block.
    pub i18n_trimmed: bool,
    /// Overrides the serializer used by `tojson`.
    pub json_dumps: Option<Arc<JsonDumpsFunc>>,
}

impl Default for Policies {
    fn default() -> Policies {
        Policies {
            truncate_leeway: 5,
            urlize_rel: "noopener".to_string(),
            urlize_target: None,
            urlize_extra_schemes: Vec::new(),
            i18n_trimmed: false,
            json_dumps: None,
        }
    }
}

impl fmt::Debug for Policies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policies")
            .field("truncate_leeway", &self.truncate_leeway)
            .field("urlize_rel", &self.urlize_rel)
            .field("urlize_target", &self.urlize_target)
            .field("urlize_extra_schemes", &self.urlize_extra_schemes)
            .field("i18n_trimmed", &self.i18n_trimmed)
            .finish()
    }
}

struct LoadedTemplate {
    template: Arc<CompiledTemplate>,
    uptodate: Option<UptodateProbe>,
}

struct TemplateStore {
    options: CompileOptions,
    default_auto_escape: Arc<AutoEscapeFunc>,
    map: BTreeMap<String, Arc<CompiledTemplate>>,
    loader: Option<Arc<dyn Loader>>,
    loaded: Mutex<LruCache<String, LoadedTemplate>>,
    compiled_cache: Option<Arc<dyn CompiledTemplateCache>>,
}

impl TemplateStore {
    fn new(default_auto_escape: Arc<AutoEscapeFunc>) -> TemplateStore {
        TemplateStore {
            options: CompileOptions::default(),
            default_auto_escape,
            map: BTreeMap::new(),
            loader: None,
            loaded: Mutex::new(LruCache::new(DEFAULT_TEMPLATE_CACHE_SIZE)),
            compiled_cache: None,
        }
    }
}

impl Clone for TemplateStore {
    fn clone(&self) -> TemplateStore {
        TemplateStore {
            options: self.options.clone(),
            default_auto_escape: self.default_auto_escape.clone(),
            map: self.map.clone(),
            loader: self.loader.clone(),
            loaded: Mutex::new(LruCache::new(DEFAULT_TEMPLATE_CACHE_SIZE)),
            compiled_cache: self.compiled_cache.clone(),
        }
    }
}

/// An abstraction that holds the engine configuration.
///
/// This object holds the central configuration state for templates and
/// is the container for all loaded templates.  Two ways to construct
/// one:
///
/// * [`Environment::new`] creates an environment preconfigured with
///   sensible defaults, all built-in filters, tests and globals.
/// * [`Environment::empty`] creates a completely blank environment.
///
/// ```
/// use vellum::{context, Environment};
///
/// let mut env = Environment::new();
/// env.add_template("hello", "Hello {{ name }}!").unwrap();
/// let tmpl = env.get_template("hello").unwrap();
/// assert_eq!(tmpl.render(context!(name => "John")).unwrap(), "Hello John!");
/// ```
#[derive(Clone)]
pub struct Environment {
    templates: TemplateStore,
    filters: BTreeMap<Cow<'static, str>, BoxedFilter>,
    tests: BTreeMap<Cow<'static, str>, BoxedTest>,
    globals: BTreeMap<Cow<'static, str>, Value>,
    undefined_behavior: UndefinedBehavior,
    sandbox: Option<Arc<dyn SandboxPolicy>>,
    finalize: Option<Arc<FinalizeFunc>>,
    i18n: I18nCallbacks,
    policies: Policies,
    recursion_limit: usize,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::empty()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("globals", &self.globals)
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("tests", &self.tests.keys().collect::<Vec<_>>())
            .field("templates", &self.templates.map.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Environment {
    /// Creates a new environment with sensible defaults.
    pub fn new() -> Environment {
        Environment {
            templates: TemplateStore::new(Arc::new(defaults::default_auto_escape_callback)),
            filters: defaults::get_builtin_filters(),
            tests: defaults::get_builtin_tests(),
            globals: defaults::get_globals(),
            undefined_behavior: UndefinedBehavior::default(),
            sandbox: None,
            finalize: None,
            i18n: I18nCallbacks::default(),
            policies: Policies::default(),
            recursion_limit: MAX_RECURSION,
        }
    }

    /// Creates a completely empty environment.
    ///
    /// No filters, no tests, no globals and no auto escaping.
    pub fn empty() -> Environment {
        Environment {
            templates: TemplateStore::new(Arc::new(defaults::no_auto_escape)),
            filters: Default::default(),
            tests: Default::default(),
            globals: Default::default(),
            undefined_behavior: UndefinedBehavior::default(),
            sandbox: None,
            finalize: None,
            i18n: I18nCallbacks::default(),
            policies: Policies::default(),
            recursion_limit: MAX_RECURSION,
        }
    }

    /// Loads a template from a string into the environment.
    ///
    /// The template is compiled immediately; syntax errors surface
    /// here rather than at render time.
    pub fn add_template(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<(), Error> {
        let name = name.into();
        let compiled = self.compile(&name, source.into())?;
        self.templates.map.insert(name, Arc::new(compiled));
        Ok(())
    }

    /// Removes a template by name.
    pub fn remove_template(&mut self, name: &str) {
        self.templates.map.remove(name);
        self.templates.loaded.lock().unwrap().remove(&name.to_string());
    }

    /// Removes all stored templates and clears the loaded cache.
    pub fn clear_templates(&mut self) {
        self.templates.map.clear();
        self.clear_caches();
    }

    /// Drops all cached loader-provided templates.
    ///
    /// The next lookup re-invokes the loader and recompiles.
    pub fn clear_caches(&self) {
        self.templates.loaded.lock().unwrap().clear();
    }

    /// Registers a template loader.
    ///
    /// Any [`Loader`] works here, including plain closures:
    ///
    /// ```
    /// # let mut env = vellum::Environment::new();
    /// env.set_loader(|name: &str| {
    ///     if name == "layout.html" {
    ///         Ok(Some("...".to_string()))
    ///     } else {
    ///         Ok(None)
    ///     }
    /// });
    /// ```
    pub fn set_loader<L: Loader + 'static>(&mut self, loader: L) {
        self.templates.loader = Some(Arc::new(loader));
    }

    /// Registers a cache for compiled templates.
    ///
    /// Templates obtained through the loader consult the cache before
    /// compiling and persist freshly compiled programs into it.
    pub fn set_compiled_template_cache(&mut self, cache: Arc<dyn CompiledTemplateCache>) {
        self.templates.compiled_cache = Some(cache);
    }

    /// Preserve the trailing newline when rendering templates.
    ///
    /// The default is `false`, which causes a single newline, if
    /// present, to be stripped from the end of the template.
    pub fn set_keep_trailing_newline(&mut self, yes: bool) {
        self.templates.options.ws.keep_trailing_newline = yes;
    }

    /// Returns the value of the trailing newline preservation flag.
    pub fn keep_trailing_newline(&self) -> bool {
        self.templates.options.ws.keep_trailing_newline
    }

    /// Remove the first newline after a block tag.  Defaults to `false`.
    pub fn set_trim_blocks(&mut self, yes: bool) {
        self.templates.options.ws.trim_blocks = yes;
    }

    /// Returns the value of the trim blocks flag.
    pub fn trim_blocks(&self) -> bool {
        self.templates.options.ws.trim_blocks
    }

    /// Remove leading spaces and tabs from the start of a line to a
    /// block tag.  Defaults to `false`.
    pub fn set_lstrip_blocks(&mut self, yes: bool) {
        self.templates.options.ws.lstrip_blocks = yes;
    }

    /// Returns the value of the lstrip blocks flag.
    pub fn lstrip_blocks(&self) -> bool {
        self.templates.options.ws.lstrip_blocks
    }

    /// Sets the syntax configuration for templates loaded afterwards.
    pub fn set_syntax(&mut self, syntax: SyntaxConfig) {
        self.templates.options.syntax = syntax;
    }

    /// Returns the current syntax configuration.
    pub fn syntax(&self) -> &SyntaxConfig {
        &self.templates.options.syntax
    }

    /// Enables a language extension.
    pub fn add_extension(&mut self, extension: Extension) {
        match extension {
            Extension::LoopControls => self.templates.options.loop_controls = true,
        }
    }

    /// Sets a new function to select the default auto escaping.
    ///
    /// The function is invoked with the template name when templates
    /// are loaded.  The default turns on HTML escaping for `.html`,
    /// `.htm` and `.xml` files.
    pub fn set_auto_escape_callback<F>(&mut self, f: F)
    where
        F: Fn(&str) -> AutoEscape + 'static + Sync + Send,
    {
        self.templates.default_auto_escape = Arc::new(f);
    }

    /// Changes the undefined behavior.
    ///
    /// The default is [`UndefinedBehavior::Lenient`].
    pub fn set_undefined_behavior(&mut self, behavior: UndefinedBehavior) {
        self.undefined_behavior = behavior;
    }

    /// Returns the current undefined behavior.
    #[inline(always)]
    pub fn undefined_behavior(&self) -> UndefinedBehavior {
        self.undefined_behavior
    }

    /// Installs a sandbox policy.
    ///
    /// With a sandbox installed every attribute access, call and
    /// (where the policy requests it) operator goes through the
    /// policy.  See [`sandbox`](crate::sandbox).
    pub fn set_sandbox<P: SandboxPolicy + 'static>(&mut self, policy: P) {
        self.sandbox = Some(Arc::new(policy));
    }

    /// Removes the sandbox policy again.
    pub fn remove_sandbox(&mut self) {
        self.sandbox = None;
    }

    pub(crate) fn sandbox(&self) -> Option<&Arc<dyn SandboxPolicy>> {
        self.sandbox.as_ref()
    }

    /// Sets a finalizer.
    ///
    /// The finalizer runs over the result of every output expression
    /// (not over literal template text) before it is written out.
    pub fn set_finalize<F>(&mut self, f: F)
    where
        F: Fn(&State, Value) -> Result<Value, Error> + 'static + Sync + Send,
    {
        self.finalize = Some(Arc::new(f));
    }

    /// Sets the translation callback for singular messages.
    pub fn set_gettext_callback<F>(&mut self, f: F)
    where
        F: Fn(&str) -> String + 'static + Sync + Send,
    {
        self.i18n.gettext = Some(Arc::new(f) as Arc<GettextCallback>);
    }

    /// Sets the translation callback for plural messages.
    pub fn set_ngettext_callback<F>(&mut self, f: F)
    where
        F: Fn(&str, &str, u64) -> String + 'static + Sync + Send,
    {
        self.i18n.ngettext = Some(Arc::new(f) as Arc<NgettextCallback>);
    }

    pub(crate) fn i18n(&self) -> &I18nCallbacks {
        &self.i18n
    }

    /// Gives access to the policies.
    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    /// Gives mutable access to the policies.
    pub fn policies_mut(&mut self) -> &mut Policies {
        &mut self.policies
    }

    /// Reconfigures the runtime recursion limit.  Defaults to 500.
    pub fn set_recursion_limit(&mut self, level: usize) {
        self.recursion_limit = level;
    }

    /// Returns the current recursion limit.
    pub fn recursion_limit(&self) -> usize {
        self.recursion_limit
    }

    /// Adds a new filter function.
    ///
    /// A filter receives the state, then all arguments with the piped
    /// value first.
    ///
    /// ```
    /// # use vellum::Environment;
    /// use vellum::value::Value;
    /// let mut env = Environment::new();
    /// env.add_filter("repeat", |_state, args: &[Value]| {
    ///     let s = args[0].to_string();
    ///     let n = args.get(1).and_then(|x| x.as_usize()).unwrap_or(2);
    ///     Ok(Value::from(s.repeat(n)))
    /// });
    /// ```
    pub fn add_filter<N, F>(&mut self, name: N, f: F)
    where
        N: Into<Cow<'static, str>>,
        F: Fn(&State, &[Value]) -> Result<Value, Error> + 'static + Sync + Send,
    {
        self.filters.insert(name.into(), BoxedFilter::new(f));
    }

    /// Removes a filter by name.
    pub fn remove_filter(&mut self, name: &str) {
        self.filters.remove(name);
    }

    /// Adds a new test function.
    pub fn add_test<N, F>(&mut self, name: N, f: F)
    where
        N: Into<Cow<'static, str>>,
        F: Fn(&State, &[Value]) -> Result<Value, Error> + 'static + Sync + Send,
    {
        self.tests.insert(name.into(), BoxedTest::new(f));
    }

    /// Removes a test by name.
    pub fn remove_test(&mut self, name: &str) {
        self.tests.remove(name);
    }

    /// Adds a new global function.
    pub fn add_function<N, F>(&mut self, name: N, f: F)
    where
        N: Into<Cow<'static, str>>,
        F: Fn(&State, &[Value]) -> Result<Value, Error> + 'static + Sync + Send,
    {
        let name = name.into();
        let value = crate::functions::BoxedFunction::new(name.to_string(), f).to_value();
        self.globals.insert(name, value);
    }

    /// Adds a global variable.
    pub fn add_global<N, V>(&mut self, name: N, value: V)
    where
        N: Into<Cow<'static, str>>,
        V: Into<Value>,
    {
        self.globals.insert(name.into(), value.into());
    }

    /// Removes a global function or variable by name.
    pub fn remove_global(&mut self, name: &str) {
        self.globals.remove(name);
    }

    /// Returns an iterator over all globals.
    pub fn globals(&self) -> impl Iterator<Item = (&str, Value)> {
        self.globals.iter().map(|(k, v)| (k as &str, v.clone()))
    }

    /// Fetches a template by name.
    ///
    /// Templates registered with [`add_template`](Self::add_template)
    /// are found directly; with a loader installed, unknown names are
    /// loaded (and cached) on demand.
    pub fn get_template(&self, name: &str) -> Result<Template<'_>, Error> {
        self.get_compiled_template(name)
            .map(|compiled| Template::new(self, compiled))
    }

    /// Loads a template from a string under the given name.
    pub fn template_from_named_str(
        &self,
        name: &str,
        source: &str,
    ) -> Result<Template<'_>, Error> {
        self.compile(name, source.to_string())
            .map(|compiled| Template::new(self, Arc::new(compiled)))
    }

    /// Loads a template from a string, named `<string>`.
    pub fn template_from_str(&self, source: &str) -> Result<Template<'_>, Error> {
        self.template_from_named_str("<string>", source)
    }

    /// Parses and renders a template from a string in one go.
    ///
    /// ```
    /// # use vellum::{Environment, context};
    /// let env = Environment::new();
    /// let rv = env.render_str("Hello {{ name }}", context! { name => "World" });
    /// assert_eq!(rv.unwrap(), "Hello World");
    /// ```
    pub fn render_str<S: Serialize>(&self, source: &str, ctx: S) -> Result<String, Error> {
        self.template_from_str(source)?.render(ctx)
    }

    /// Like [`render_str`](Self::render_str) with an explicit name.
    pub fn render_named_str<S: Serialize>(
        &self,
        name: &str,
        source: &str,
        ctx: S,
    ) -> Result<String, Error> {
        self.template_from_named_str(name, source)?.render(ctx)
    }

    /// Returns an iterator over the explicitly registered templates.
    pub fn templates(&self) -> impl Iterator<Item = (&str, Template<'_>)> {
        self.templates
            .map
            .iter()
            .map(|(name, compiled)| (name.as_str(), Template::new(self, compiled.clone())))
    }

    /// Enumerates the template names the loader can serve.
    pub fn list_templates(&self) -> Vec<String> {
        let mut rv: Vec<String> = self.templates.map.keys().cloned().collect();
        if let Some(ref loader) = self.templates.loader {
            for name in loader.list_templates() {
                if !rv.contains(&name) {
                    rv.push(name);
                }
            }
        }
        rv.sort();
        rv
    }

    /// Compiles an expression.
    ///
    /// This lets the expression language be used standalone:
    ///
    /// ```
    /// # use vellum::{Environment, context};
    /// let env = Environment::new();
    /// let expr = env.compile_expression("number < 42").unwrap();
    /// let result = expr.eval(context!(number => 23)).unwrap();
    /// assert!(result.is_true());
    /// ```
    pub fn compile_expression(&self, expr: &str) -> Result<Expression<'_>, Error> {
        parser::parse_expr(expr).map(|ast| Expression::new(self, ast))
    }

    /// Returns an empty [`State`] for testing purposes and similar.
    pub fn empty_state(&self) -> State<'_> {
        State::new_for_env(self)
    }

    pub(crate) fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    pub(crate) fn get_filter(&self, name: &str) -> Option<&BoxedFilter> {
        self.filters.get(name)
    }

    pub(crate) fn get_test(&self, name: &str) -> Option<&BoxedTest> {
        self.tests.get(name)
    }

    /// The cache signature of this environment's compiler-relevant
    /// configuration.
    fn signature(&self) -> String {
        let syntax = self.templates.options.syntax.syntax();
        format!(
            "v1;{};{};{};{};{};{};{:?};{:?};kt={};tb={};ls={};lc={}",
            syntax.block_start,
            syntax.block_end,
            syntax.variable_start,
            syntax.variable_end,
            syntax.comment_start,
            syntax.comment_end,
            syntax.line_statement_prefix,
            syntax.line_comment_prefix,
            self.templates.options.ws.keep_trailing_newline,
            self.templates.options.ws.trim_blocks,
            self.templates.options.ws.lstrip_blocks,
            self.templates.options.loop_controls,
        )
    }

    fn compile(&self, name: &str, source: String) -> Result<CompiledTemplate, Error> {
        let initial_auto_escape = (self.templates.default_auto_escape)(name);
        let folder = |filter_name: &str, args: &[Value]| -> Option<Value> {
            if !optimizer::PURE_FILTERS.contains(&filter_name) {
                return None;
            }
            let filter = self.get_filter(filter_name)?;
            let state = State::new_for_env(self);
            filter.call(&state, args).ok()
        };
        CompiledTemplate::new(
            name,
            source,
            &self.templates.options,
            initial_auto_escape,
            &folder,
        )
    }

    /// Resolves a compiled template by name.
    pub(crate) fn get_compiled_template(
        &self,
        name: &str,
    ) -> Result<Arc<CompiledTemplate>, Error> {
        if let Some(compiled) = self.templates.map.get(name) {
            return Ok(compiled.clone());
        }
        let loader = match self.templates.loader {
            Some(ref loader) => loader.clone(),
            None => return Err(Error::template_not_found(name)),
        };

        // the whole lookup-or-compile runs under the cache lock so
        // that concurrent renders of the same missing template do not
        // compile twice
        let mut cache = self.templates.loaded.lock().unwrap();
        let key = name.to_string();
        let mut stale = false;
        if let Some(entry) = cache.get(&key) {
            if !matches!(entry.uptodate, Some(ref probe) if !probe()) {
                return Ok(entry.template.clone());
            }
            stale = true;
        }
        if stale {
            cache.remove(&key);
        }

        let entry = cache.get_or_try_insert_with(&key, || {
            let source = loader.get_source(name)?;
            Ok::<_, Error>(LoadedTemplate {
                template: Arc::new(self.load_or_compile(name, source.source)?),
                uptodate: source.uptodate,
            })
        })?;
        Ok(entry.template.clone())
    }

    fn load_or_compile(&self, name: &str, source: String) -> Result<CompiledTemplate, Error> {
        let compiled_cache = match self.templates.compiled_cache {
            Some(ref cache) => cache.clone(),
            None => return self.compile(name, source),
        };
        let mut bucket = CacheBucket::new(self.signature(), name, &source);
        compiled_cache.load(&mut bucket);
        if let Some(compiled) = bucket.take_template() {
            return Ok(compiled);
        }
        let compiled = self.compile(name, source)?;
        bucket.put_template(&compiled);
        compiled_cache.store(&bucket);
        Ok(compiled)
    }

    /// Applies the configured finalizer to an output value.
    pub(crate) fn finalize_value(&self, state: &State, value: Value) -> Result<Value, Error> {
        match self.finalize {
            Some(ref finalize) => finalize(state, value),
            None => Ok(value),
        }
    }

    /// Writes a value into the output honoring auto escaping.
    pub(crate) fn format(
        &self,
        value: &Value,
        state: &State,
        out: &mut Output,
    ) -> Result<(), Error> {
        if value.undefined_kind() == Some(UndefinedKind::Strict) {
            return Err(value.undefined_error());
        }
        match (state.auto_escape(), &self.policies.json_dumps) {
            (AutoEscape::Json, Some(dumps)) => {
                let rv = dumps(value)?;
                out.write_str(&rv).map_err(Error::from)
            }
            (auto_escape, _) => write_escaped(out, auto_escape, value),
        }
    }
}
