//! The template registry. Templates are written in Go's text/template syntax
//! (via [`gtmpl`]) and compiled once, at registration, against a fixed set of
//! helper functions. Compilation problems (syntax errors, references to
//! unknown functions) therefore surface when a template is registered, never
//! when a page is rendered.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gtmpl::{Context, Func, FuncError, Template, Value};
use log::debug;
use thiserror::Error;
use walkdir::WalkDir;

/// Represents the result of a template operation.
pub type Result<T> = std::result::Result<T, TemplateError>;

/// Represents a template failure. The three page-facing classes are kept apart
/// so callers can react to absence ([`TemplateError::NotFound`]) without
/// hiding malformed or failing templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Returned when template source can't be compiled. The registry is left
    /// unchanged.
    #[error("compiling template `{name}`: {message}")]
    Compile { name: String, message: String },

    /// Returned when no template is registered under the requested name.
    #[error("template `{0}` not found")]
    NotFound(String),

    /// Returned when a compiled template fails while executing against a page.
    #[error("executing template `{name}`: {message}")]
    Execution { name: String, message: String },

    /// Returned when a layouts directory can't be read.
    #[error("reading template file `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Returned when a layouts directory can't be walked.
    #[error("walking layouts directory: {0}")]
    Walk(#[from] walkdir::Error),
}

impl TemplateError {
    /// Whether this error means the template doesn't exist (as opposed to
    /// existing but being broken).
    pub fn is_not_found(&self) -> bool {
        matches!(self, TemplateError::NotFound(_))
    }
}

/// The helper functions available to every template, in addition to gtmpl's
/// builtins (`print`, `len`, `index`, `eq`, `html`, `urlquery`, ...).
pub const HELPERS: &[(&str, Func)] = &[
    ("urlize", urlize),
    ("lower", lower),
    ("upper", upper),
    ("trim", trim),
];

/// Compiled templates keyed by name.
///
/// The registry is filled sequentially before rendering starts and is only
/// read afterwards, so rendering threads share it without locking.
pub struct TemplateRegistry {
    helpers: Vec<(String, Func)>,
    templates: HashMap<String, Template>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRegistry {
    /// Creates an empty registry whose helper set is pre-populated with
    /// [`HELPERS`].
    pub fn new() -> Self {
        TemplateRegistry {
            helpers: HELPERS
                .iter()
                .map(|(name, func)| ((*name).to_owned(), *func))
                .collect(),
            templates: HashMap::new(),
        }
    }

    /// Adds a helper function. Only templates registered afterwards can call
    /// it.
    pub fn add_helper(&mut self, name: &str, func: Func) {
        self.helpers.retain(|(existing, _)| existing != name);
        self.helpers.push((name.to_owned(), func));
    }

    /// Compiles `source` and stores it under `name`, replacing any previous
    /// template with that name. On failure the previous template is kept.
    pub fn register(&mut self, name: &str, source: &str) -> Result<()> {
        if let Some(offset) = unclosed_action(source) {
            return Err(TemplateError::Compile {
                name: name.to_owned(),
                message: format!("unclosed action starting at byte {}", offset),
            });
        }

        let mut template = Template::default();
        for (helper, func) in &self.helpers {
            template.add_func(helper, *func);
        }
        template
            .parse(source)
            .map_err(|e| TemplateError::Compile {
                name: name.to_owned(),
                message: e.to_string(),
            })?;

        if self.templates.insert(name.to_owned(), template).is_some() {
            debug!("Replaced template `{}`", name);
        } else {
            debug!("Registered template `{}`", name);
        }
        Ok(())
    }

    /// Returns the template registered under `name`.
    pub fn lookup(&self, name: &str) -> Result<&Template> {
        self.templates
            .get(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// The registered template names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Executes the template registered under `name` against `data`. The
    /// output is buffered privately and only returned if execution succeeds.
    pub fn execute(&self, name: &str, data: Value) -> Result<String> {
        let template = self.lookup(name)?;
        let execution = |message: String| TemplateError::Execution {
            name: name.to_owned(),
            message,
        };

        let mut buffer: Vec<u8> = Vec::new();
        template
            .execute(&mut buffer, &Context::from(data))
            .map_err(|e| execution(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| execution(e.to_string()))
    }

    /// Registers every file below `dir` under its `/`-separated path relative
    /// to `dir` (e.g. `blue/single.html`). Returns the number of templates
    /// registered. Stops at the first file which fails to compile.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut count = 0;
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = match entry.path().strip_prefix(dir) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let source =
                std::fs::read_to_string(entry.path()).map_err(|e| TemplateError::Io {
                    path: entry.path().to_owned(),
                    source: e,
                })?;
            self.register(&name, &source)?;
            count += 1;
        }
        Ok(count)
    }
}

// gtmpl's lexer doesn't return for some actions left open at the end of the
// input, so those are rejected before parsing. Returns the offset of the first
// `{{` without a closing `}}`.
fn unclosed_action(source: &str) -> Option<usize> {
    let mut rest = 0;
    while let Some(found) = source[rest..].find("{{") {
        let open = rest + found;
        match action_len(&source[open + 2..]) {
            Some(len) => rest = open + 2 + len,
            None => return Some(open),
        }
    }
    None
}

// The length of an action body up to and including its closing `}}`. Quoted
// strings, raw strings, and comments may contain `}}`.
fn action_len(body: &str) -> Option<usize> {
    let trimmed = body.trim_start_matches('-').trim_start();
    if trimmed.starts_with("/*") {
        let start = body.len() - trimmed.len();
        let after = start + trimmed.find("*/")? + 2;
        return body[after..].find("}}").map(|i| after + i + 2);
    }

    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' | '\'' => {
                let mut escaped = false;
                loop {
                    let (_, d) = chars.next()?;
                    match d {
                        _ if escaped => escaped = false,
                        '\\' => escaped = true,
                        _ if d == c => break,
                        _ => (),
                    }
                }
            }
            '`' => loop {
                if chars.next()?.1 == '`' {
                    break;
                }
            },
            '}' if body[i..].starts_with("}}") => return Some(i + 2),
            _ => (),
        }
    }
    None
}

fn single_string<'a>(name: &str, args: &'a [Value]) -> std::result::Result<&'a str, FuncError> {
    match args {
        [Value::String(s)] => Ok(s),
        [other] => Err(FuncError::Generic(format!(
            "{} expects a string; found {}",
            name, other
        ))),
        _ => Err(FuncError::ExactlyXArgs(name.to_owned(), 1)),
    }
}

/// Converts a string into a URL-safe slug (`"Simple Template"` becomes
/// `"simple-template"`).
fn urlize(args: &[Value]) -> std::result::Result<Value, FuncError> {
    Ok(Value::from(slug::slugify(single_string("urlize", args)?)))
}

fn lower(args: &[Value]) -> std::result::Result<Value, FuncError> {
    Ok(Value::from(single_string("lower", args)?.to_lowercase()))
}

fn upper(args: &[Value]) -> std::result::Result<Value, FuncError> {
    Ok(Value::from(single_string("upper", args)?.to_uppercase()))
}

fn trim(args: &[Value]) -> std::result::Result<Value, FuncError> {
    Ok(Value::from(single_string("trim", args)?.trim()))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    const TEMPLATE_TITLE: &str = "{{ .Title }}";
    const TEMPLATE_MISSING_FUNC: &str = "{{ .Title | funcdoesnotexists }}";
    const TEMPLATE_FUNC: &str = "{{ .Title | urlize }}";

    fn titled(title: &str) -> Value {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("Title".to_owned(), Value::from(title));
        Value::Object(m)
    }

    #[test]
    fn test_register_and_execute() -> Result<()> {
        let mut registry = TemplateRegistry::new();
        registry.register("foo", TEMPLATE_TITLE)?;
        assert_eq!("simple template", registry.execute("foo", titled("simple template"))?);
        Ok(())
    }

    #[test]
    fn test_helper_urlize() -> Result<()> {
        let mut registry = TemplateRegistry::new();
        registry.register("func", TEMPLATE_FUNC)?;
        assert_eq!("simple-template", registry.execute("func", titled("simple template"))?);
        Ok(())
    }

    #[test]
    fn test_other_helpers() -> Result<()> {
        let mut registry = TemplateRegistry::new();
        registry.register("case", "{{ upper .Title }}/{{ lower .Title }}/{{ trim \"  x \" }}")?;
        assert_eq!("ABC DEF/abc def/x", registry.execute("case", titled("aBc dEf"))?);
        Ok(())
    }

    #[test]
    fn test_unknown_function_fails_at_compile_time() {
        let mut registry = TemplateRegistry::new();
        match registry.register("missing", TEMPLATE_MISSING_FUNC) {
            Err(TemplateError::Compile { name, .. }) => assert_eq!("missing", name),
            other => panic!("wanted compile error; found {:?}", other),
        }
        assert!(!registry.contains("missing"));
    }

    #[test]
    fn test_syntax_error_fails_at_compile_time() {
        let mut registry = TemplateRegistry::new();
        assert!(matches!(
            registry.register("broken", "{{ .Title "),
            Err(TemplateError::Compile { .. })
        ));
    }

    #[test]
    fn test_unclosed_actions_fail_at_compile_time() {
        let mut registry = TemplateRegistry::new();
        for source in ["{{ .Title", "{{ .Title   \n", "ok {{ .Title }} then {{ ", "{{ \"}}\" ", "{{/* }} "] {
            assert!(
                matches!(registry.register("broken", source), Err(TemplateError::Compile { .. })),
                "{:?}",
                source
            );
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_closing_delimiters_inside_strings() -> Result<()> {
        let mut registry = TemplateRegistry::new();
        registry.register("quoted", "{{ \"}}\" }}|{{ .Title }}")?;
        assert_eq!("}}|x", registry.execute("quoted", titled("x"))?);
        assert_eq!(None, unclosed_action("{{/* }} */}}{{- `}}` -}}"));
        Ok(())
    }

    #[test]
    fn test_failed_compile_keeps_previous_template() -> Result<()> {
        let mut registry = TemplateRegistry::new();
        registry.register("foo", TEMPLATE_TITLE)?;
        assert!(registry.register("foo", TEMPLATE_MISSING_FUNC).is_err());
        assert_eq!("kept", registry.execute("foo", titled("kept"))?);
        Ok(())
    }

    #[test]
    fn test_register_same_name_twice_replaces() -> Result<()> {
        let mut registry = TemplateRegistry::new();
        registry.register("foo", TEMPLATE_TITLE)?;
        assert_eq!("simple template", registry.execute("foo", titled("simple template"))?);

        registry.register("foo", "NEW {{ .Title }}")?;
        assert_eq!("NEW simple template", registry.execute("foo", titled("simple template"))?);
        assert_eq!(vec!["foo"], registry.names());
        Ok(())
    }

    #[test]
    fn test_lookup_missing() {
        let registry = TemplateRegistry::new();
        let err = registry.lookup("foobar").err();
        assert!(matches!(&err, Some(TemplateError::NotFound(name)) if name == "foobar"));
        assert!(err.map(|e| e.is_not_found()).unwrap_or(false));
    }

    #[test]
    fn test_execution_error() -> Result<()> {
        let mut registry = TemplateRegistry::new();
        // Compiles (the function exists) but fails when called without an
        // argument.
        registry.register("bad", "before {{ urlize }} after")?;
        match registry.execute("bad", titled("x")) {
            Err(TemplateError::Execution { name, .. }) => assert_eq!("bad", name),
            other => panic!("wanted execution error; found {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_custom_helper() -> Result<()> {
        fn shout(args: &[Value]) -> std::result::Result<Value, FuncError> {
            Ok(Value::from(format!("{}!", single_string("shout", args)?)))
        }

        let mut registry = TemplateRegistry::new();
        assert!(registry.register("early", "{{ shout .Title }}").is_err());
        registry.add_helper("shout", shout);
        registry.register("late", "{{ shout .Title }}")?;
        assert_eq!("hey!", registry.execute("late", titled("hey"))?);
        Ok(())
    }

    #[test]
    fn test_load_dir() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|e| TemplateError::Io {
            path: PathBuf::new(),
            source: e,
        })?;
        let write = |relative: &str, contents: &str| {
            let path = dir.path().join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        };
        write("_default/single.html", "default {{ .Title }}");
        write("blue/single.html", "blue {{ .Title }}");

        let mut registry = TemplateRegistry::new();
        assert_eq!(2, registry.load_dir(dir.path())?);
        assert_eq!(vec!["_default/single.html", "blue/single.html"], registry.names());
        assert_eq!("blue t", registry.execute("blue/single.html", titled("t"))?);
        Ok(())
    }
}
