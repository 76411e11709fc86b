//! A deterministic in-memory interpreter provider.
//!
//! The provider implements the parser and analyzer contracts over a small
//! line-oriented reading of Python source, just enough to exercise the
//! pipeline and the request handlers without a real interpreter. Tests can
//! additionally script results for specific expressions.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use lsp_types::Diagnostic;
use lsp_types::Location;
use lsp_types::Position;
use lsp_types::Range;
use parking_lot::Mutex;
use url::Url;

use crate::contracts::AnalysisValue;
use crate::contracts::CallContext;
use crate::contracts::MemberInfo;
use crate::contracts::Overload;
use crate::contracts::ParameterInfo;
use crate::contracts::Parse;
use crate::contracts::ReferenceKind;
use crate::contracts::SemanticAnalyzer;
use crate::contracts::SyntaxParser;
use crate::contracts::SyntaxTree;
use crate::contracts::ValueKind;
use crate::contracts::VariableReference;
use crate::document::ParseCookie;
use crate::document::TextDocument;
use crate::edit::SourcePosition;
use crate::error::Error;
use crate::error::Result;
use crate::interpreter::Interpreter;
use crate::interpreter::InterpreterConfig;
use crate::interpreter::InterpreterFactory;

/// A marker that makes the test parser reject a source.
pub const PARSE_ERROR_MARKER: &str = "<parse error>";

/// The per-part sources most recently parsed for each document.
type Sources = Arc<Mutex<HashMap<Url, BTreeMap<u32, String>>>>;

/// Whether a character can appear in an identifier.
fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// A syntax tree backed by the raw part sources.
struct TestTree {
    /// The text of each part at parse time.
    texts: BTreeMap<u32, String>,
}

impl TestTree {
    /// Gets a line of a part.
    fn line(&self, part: u32, line: u32) -> Option<&str> {
        self.texts.get(&part)?.lines().nth(line as usize)
    }

    /// Gets the identifier-and-dot token ending at the given column.
    fn token_before<'a>(&self, line: &'a str, column: usize) -> &'a str {
        let column = column.min(line.len());
        let start = line[..column]
            .char_indices()
            .rev()
            .take_while(|(_, c)| is_identifier_char(*c) || *c == '.')
            .last()
            .map(|(i, _)| i)
            .unwrap_or(column);
        &line[start..column]
    }
}

impl SyntaxTree for TestTree {
    fn find_member_expression(&self, part: u32, position: SourcePosition) -> Option<String> {
        let line = self.line(part, position.line)?;
        let token = self.token_before(line, position.character as usize);
        let dot = token.rfind('.')?;
        let expression = &token[..dot];
        if expression.is_empty() {
            None
        } else {
            Some(expression.to_string())
        }
    }

    fn find_expression(&self, part: u32, position: SourcePosition) -> Option<String> {
        let line = self.line(part, position.line)?;
        let column = (position.character as usize).min(line.len());

        let prefix = self.token_before(line, column);
        let suffix: String = line[column..]
            .chars()
            .take_while(|c| is_identifier_char(*c))
            .collect();

        let expression = format!("{prefix}{suffix}");
        if expression.is_empty() || expression.starts_with(|c: char| c.is_ascii_digit()) {
            None
        } else {
            Some(expression)
        }
    }

    fn find_call(&self, part: u32, position: SourcePosition) -> Option<CallContext> {
        let line = self.line(part, position.line)?;
        let column = (position.character as usize).min(line.len());

        // Walk left to the unmatched open parenthesis, counting top level
        // commas along the way
        let mut depth = 0usize;
        let mut commas = 0u32;
        let mut open = None;
        for (index, c) in line[..column].char_indices().rev() {
            match c {
                ')' => depth += 1,
                '(' if depth == 0 => {
                    open = Some(index);
                    break;
                }
                '(' => depth -= 1,
                ',' if depth == 0 => commas += 1,
                _ => {}
            }
        }

        let open = open?;
        let callee = self.token_before(line, open).to_string();
        if callee.is_empty() {
            return None;
        }

        // Collect keyword argument names already present in the call
        let mut argument_names = Vec::new();
        for argument in line[open + 1..].split(',') {
            if let Some((name, _)) = argument.split_once('=') {
                let name = name.trim();
                if !name.is_empty() && name.chars().all(is_identifier_char) {
                    argument_names.push(name.to_string());
                }
            }
        }

        Some(CallContext {
            callee,
            argument_index: commas,
            argument_names,
        })
    }

    fn find_import_name(&self, part: u32, position: SourcePosition) -> Option<String> {
        let line = self.line(part, position.line)?;
        let rest = line.trim_start().strip_prefix("import ")?;
        let name: String = rest
            .trim_start()
            .chars()
            .take_while(|c| is_identifier_char(*c) || *c == '.')
            .collect();
        if name.is_empty() { None } else { Some(name) }
    }
}

/// A parser over raw part sources.
#[derive(Default)]
pub struct TestParser {
    /// An artificial delay applied to every parse.
    delay: Mutex<Option<Duration>>,
    /// The number of parses that have started.
    parses: AtomicUsize,
    /// The shared source snapshots consumed by the analyzer.
    sources: Sources,
}

impl TestParser {
    /// Sets an artificial delay applied to every parse.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Gets the number of parses that have started.
    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for TestParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestParser")
            .field("parses", &self.parse_count())
            .finish_non_exhaustive()
    }
}

impl SyntaxParser for TestParser {
    fn parse(&self, uri: &Url, document: &TextDocument) -> Result<Parse> {
        self.parses.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = *self.delay.lock() {
            std::thread::sleep(delay);
        }

        let mut texts = BTreeMap::new();
        let parts = document.parts();
        if parts.is_empty() {
            // Disk backed documents are read from the file system
            if let Ok(path) = uri.to_file_path()
                && let Ok(text) = std::fs::read_to_string(&path)
            {
                texts.insert(0, text);
            }
        } else {
            for part in parts {
                match document.text(part) {
                    Some(text) => {
                        texts.insert(part, text);
                    }
                    None if part == 0 => {
                        if let Ok(path) = uri.to_file_path()
                            && let Ok(text) = std::fs::read_to_string(&path)
                        {
                            texts.insert(0, text);
                        }
                    }
                    None => {}
                }
            }
        }

        if texts.values().any(|text| text.contains(PARSE_ERROR_MARKER)) {
            return Err(Error::BadSource);
        }

        self.sources.lock().insert(uri.clone(), texts.clone());
        Ok(Parse {
            tree: Arc::new(TestTree { texts }),
            cookie: ParseCookie::snapshot(document),
        })
    }
}

/// Module state derived by the test analyzer.
#[derive(Debug, Default, Clone)]
struct ModuleState {
    /// The primary module name.
    name: String,
    /// Every name the module can be imported as.
    aliases: Vec<String>,
    /// The module names the module imports.
    imports: Vec<String>,
    /// The members declared by the module.
    members: Vec<MemberInfo>,
    /// The parameter names of each declared function.
    functions: HashMap<String, Vec<String>>,
}

/// Mutable analyzer state.
#[derive(Default)]
struct AnalyzerState {
    /// Known modules, keyed by URI.
    modules: HashMap<Url, ModuleState>,
    /// Import names, mapped to the module that owns them.
    names: HashMap<String, Url>,
    /// The URIs analyzed, in order.
    analyzed: Vec<Url>,
    /// How many times module state has been reloaded.
    reloads: usize,
}

/// An analyzer deriving module state from a line-oriented reading of the
/// source.
///
/// Results for specific expressions can be overridden with the `set_`
/// methods.
#[derive(Default)]
pub struct TestAnalyzer {
    /// The derived module state.
    state: Mutex<AnalyzerState>,
    /// The module search paths.
    search_paths: Mutex<Vec<PathBuf>>,
    /// The shared source snapshots produced by the parser.
    sources: Sources,
    /// Scripted diagnostics per document part.
    diagnostics: Mutex<HashMap<Url, HashMap<u32, Vec<Diagnostic>>>>,
    /// Scripted overloads per callee.
    overloads: Mutex<HashMap<String, Vec<Overload>>>,
    /// Scripted values per expression.
    values: Mutex<HashMap<String, Vec<AnalysisValue>>>,
    /// Scripted variable references per expression.
    variables: Mutex<HashMap<String, Vec<VariableReference>>>,
}

impl TestAnalyzer {
    /// Sets the diagnostics reported for a document part.
    pub fn set_diagnostics(&self, uri: &Url, part: u32, diagnostics: Vec<Diagnostic>) {
        self.diagnostics
            .lock()
            .entry(uri.clone())
            .or_default()
            .insert(part, diagnostics);
    }

    /// Sets the overloads reported for a callee.
    pub fn set_overloads(&self, callee: &str, overloads: Vec<Overload>) {
        self.overloads.lock().insert(callee.to_string(), overloads);
    }

    /// Sets the analyzed values reported for an expression.
    pub fn set_values(&self, expression: &str, values: Vec<AnalysisValue>) {
        self.values.lock().insert(expression.to_string(), values);
    }

    /// Sets the variable references reported for an expression.
    pub fn set_variables(&self, expression: &str, variables: Vec<VariableReference>) {
        self.variables
            .lock()
            .insert(expression.to_string(), variables);
    }

    /// Gets the URIs analyzed so far, in order.
    pub fn analyzed(&self) -> Vec<Url> {
        self.state.lock().analyzed.clone()
    }

    /// Gets how many times module state has been reloaded.
    pub fn reload_count(&self) -> usize {
        self.state.lock().reloads
    }

    /// Gets the registered import names.
    pub fn known_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().names.keys().cloned().collect();
        names.sort();
        names
    }

    /// Gets the primary name and aliases of a module.
    pub fn module_names(&self, uri: &Url) -> Option<(String, Vec<String>)> {
        let state = self.state.lock();
        state
            .modules
            .get(uri)
            .map(|module| (module.name.clone(), module.aliases.clone()))
    }

    /// Derives module members from one part's source.
    fn analyze_part(uri: &Url, part_text: &str, module: &mut ModuleState) {
        /// Creates a whole-line location for a member declaration.
        fn location(uri: &Url, line: u32, length: u32) -> Location {
            Location::new(
                uri.clone(),
                Range::new(Position::new(line, 0), Position::new(line, length)),
            )
        }

        for (index, line) in part_text.lines().enumerate() {
            let index = index as u32;
            let trimmed = line.trim_end();

            if let Some(rest) = trimmed.strip_prefix("import ") {
                for name in rest.split(',') {
                    let name = name.trim().to_string();
                    if !name.is_empty() && !module.imports.contains(&name) {
                        module.imports.push(name);
                    }
                }
            } else if let Some(rest) = trimmed.strip_prefix("def ") {
                let name: String = rest.chars().take_while(|c| is_identifier_char(*c)).collect();
                if name.is_empty() {
                    continue;
                }

                let parameters = rest
                    .split_once('(')
                    .and_then(|(_, rest)| rest.split_once(')'))
                    .map(|(parameters, _)| {
                        parameters
                            .split(',')
                            .map(|p| {
                                p.split_once('=')
                                    .map(|(name, _)| name)
                                    .unwrap_or(p)
                                    .trim()
                                    .to_string()
                            })
                            .filter(|p| !p.is_empty())
                            .collect()
                    })
                    .unwrap_or_default();

                module.functions.insert(name.clone(), parameters);
                module.members.push(MemberInfo {
                    location: location(uri, index, trimmed.len() as u32),
                    name,
                    kind: ValueKind::Function,
                });
            } else if let Some(rest) = trimmed.strip_prefix("class ") {
                let name: String = rest.chars().take_while(|c| is_identifier_char(*c)).collect();
                if !name.is_empty() {
                    module.members.push(MemberInfo {
                        location: location(uri, index, trimmed.len() as u32),
                        name,
                        kind: ValueKind::Class,
                    });
                }
            } else if !trimmed.starts_with(char::is_whitespace)
                && let Some((name, _)) = trimmed.split_once('=')
            {
                let name = name.trim();
                if !name.is_empty() && name.chars().all(is_identifier_char) {
                    module.members.push(MemberInfo {
                        location: location(uri, index, trimmed.len() as u32),
                        name: name.to_string(),
                        kind: ValueKind::Variable,
                    });
                }
            }
        }
    }

    /// Converts a member into an analysis value.
    fn member_value(module: &ModuleState, member: &MemberInfo) -> AnalysisValue {
        let description = match member.kind {
            ValueKind::Function => {
                let parameters = module
                    .functions
                    .get(&member.name)
                    .map(|p| p.join(", "))
                    .unwrap_or_default();
                format!("def {name}({parameters})", name = member.name)
            }
            ValueKind::Class => format!("class {name}", name = member.name),
            _ => member.name.clone(),
        };

        AnalysisValue::new(member.name.clone(), member.kind).with_short_description(description)
    }
}

impl std::fmt::Debug for TestAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestAnalyzer")
            .field("modules", &self.state.lock().modules.len())
            .finish_non_exhaustive()
    }
}

impl SemanticAnalyzer for TestAnalyzer {
    fn add_module(
        &self,
        name: &str,
        _path: Option<&std::path::Path>,
        uri: &Url,
        _cookie: &ParseCookie,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let module = state.modules.entry(uri.clone()).or_default();
        module.name = name.to_string();
        if !module.aliases.contains(&name.to_string()) {
            module.aliases.push(name.to_string());
        }

        state.names.insert(name.to_string(), uri.clone());
        Ok(())
    }

    fn add_module_alias(&self, uri: &Url, alias: &str) {
        let mut state = self.state.lock();
        if let Some(module) = state.modules.get_mut(uri)
            && !module.aliases.contains(&alias.to_string())
        {
            module.aliases.push(alias.to_string());
        }

        state.names.insert(alias.to_string(), uri.clone());
    }

    fn remove_module(&self, uri: &Url) {
        let mut state = self.state.lock();
        state.modules.remove(uri);
        state.names.retain(|_, owner| owner != uri);
    }

    fn entries_importing(&self, name: &str, _recursive: bool) -> Vec<Url> {
        let state = self.state.lock();
        let mut uris: Vec<_> = state
            .modules
            .iter()
            .filter(|(_, module)| module.imports.iter().any(|import| import == name))
            .map(|(uri, _)| uri.clone())
            .collect();
        uris.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        uris
    }

    fn search_paths(&self) -> Vec<PathBuf> {
        self.search_paths.lock().clone()
    }

    fn diagnostics(&self, uri: &Url) -> HashMap<u32, Vec<Diagnostic>> {
        self.diagnostics.lock().get(uri).cloned().unwrap_or_default()
    }

    fn reload_modules(&self) {
        self.state.lock().reloads += 1;
    }

    fn analyze(&self, uri: &Url, _tree: &Arc<dyn SyntaxTree>, _cookie: &ParseCookie) -> Result<()> {
        let sources = self.sources.lock().get(uri).cloned().unwrap_or_default();

        let mut state = self.state.lock();
        let module = state.modules.entry(uri.clone()).or_default();
        module.imports.clear();
        module.members.clear();
        module.functions.clear();
        for text in sources.values() {
            Self::analyze_part(uri, text, module);
        }

        state.analyzed.push(uri.clone());
        Ok(())
    }

    fn members(
        &self,
        _uri: &Url,
        expression: &str,
        _position: SourcePosition,
        _intersect: bool,
    ) -> Vec<AnalysisValue> {
        if let Some(values) = self.values.lock().get(expression) {
            return values.clone();
        }

        // A module expression yields the module's members
        let state = self.state.lock();
        let Some(owner) = state.names.get(expression) else {
            return Vec::new();
        };
        let Some(module) = state.modules.get(owner) else {
            return Vec::new();
        };

        module
            .members
            .iter()
            .map(|member| Self::member_value(module, member))
            .collect()
    }

    fn available_names(
        &self,
        uri: &Url,
        _position: SourcePosition,
        include_all_modules: bool,
    ) -> Vec<AnalysisValue> {
        let state = self.state.lock();
        let mut values = Vec::new();

        if let Some(module) = state.modules.get(uri) {
            values.extend(
                module
                    .members
                    .iter()
                    .map(|member| Self::member_value(module, member)),
            );
        }

        if include_all_modules {
            let mut names: Vec<_> = state.names.keys().cloned().collect();
            names.sort();
            values.extend(
                names
                    .into_iter()
                    .map(|name| AnalysisValue::new(name, ValueKind::Module)),
            );
        }

        values
    }

    fn overloads(&self, uri: &Url, callee: &str, _position: SourcePosition) -> Vec<Overload> {
        if let Some(overloads) = self.overloads.lock().get(callee) {
            return overloads.clone();
        }

        // Derive a single overload from the module's own functions
        let state = self.state.lock();
        let Some(module) = state.modules.get(uri) else {
            return Vec::new();
        };
        let Some(parameters) = module.functions.get(callee) else {
            return Vec::new();
        };

        vec![Overload {
            name: callee.to_string(),
            documentation: None,
            parameters: parameters
                .iter()
                .map(|name| ParameterInfo {
                    name: name.clone(),
                    documentation: None,
                    default_value: None,
                })
                .collect(),
        }]
    }

    fn variables(
        &self,
        uri: &Url,
        expression: &str,
        _position: SourcePosition,
    ) -> Vec<VariableReference> {
        if let Some(variables) = self.variables.lock().get(expression) {
            return variables.clone();
        }

        // Fall back to the declaration site, if the module declares it
        let state = self.state.lock();
        let Some(module) = state.modules.get(uri) else {
            return Vec::new();
        };

        module
            .members
            .iter()
            .filter(|member| member.name == expression)
            .map(|member| VariableReference {
                kind: ReferenceKind::Definition,
                location: Some(member.location.clone()),
            })
            .collect()
    }

    fn values(&self, uri: &Url, expression: &str, _position: SourcePosition) -> Vec<AnalysisValue> {
        if let Some(values) = self.values.lock().get(expression) {
            return values.clone();
        }

        let state = self.state.lock();
        let Some(module) = state.modules.get(uri) else {
            return Vec::new();
        };

        module
            .members
            .iter()
            .filter(|member| member.name == expression)
            .map(|member| Self::member_value(module, member))
            .collect()
    }

    fn module_definitions(&self, name: &str) -> Vec<Location> {
        let state = self.state.lock();
        state
            .names
            .get(name)
            .map(|uri| {
                vec![Location::new(
                    uri.clone(),
                    Range::new(Position::new(0, 0), Position::new(0, 0)),
                )]
            })
            .unwrap_or_default()
    }

    fn module_members(&self, uri: &Url) -> Vec<MemberInfo> {
        let state = self.state.lock();
        state
            .modules
            .get(uri)
            .map(|module| module.members.clone())
            .unwrap_or_default()
    }
}

/// A bundle of test language services sharing one source snapshot store.
#[derive(Debug, Clone)]
pub struct TestServices {
    /// The parser.
    pub parser: Arc<TestParser>,
    /// The analyzer.
    pub analyzer: Arc<TestAnalyzer>,
}

impl TestServices {
    /// Constructs a new service bundle.
    pub fn new() -> Self {
        let sources: Sources = Default::default();
        let parser = Arc::new(TestParser {
            sources: sources.clone(),
            ..Default::default()
        });
        let analyzer = Arc::new(TestAnalyzer {
            sources,
            ..Default::default()
        });

        Self { parser, analyzer }
    }

    /// Gets the services as an interpreter.
    pub fn interpreter(&self) -> Interpreter {
        Interpreter {
            parser: self.parser.clone(),
            analyzer: self.analyzer.clone(),
        }
    }
}

/// An interpreter factory producing [`TestServices`].
#[derive(Debug)]
pub struct TestInterpreterFactory {
    /// The services returned by every create call.
    services: TestServices,
}

impl TestInterpreterFactory {
    /// Constructs a factory around the given services.
    pub fn new(services: TestServices) -> Self {
        Self { services }
    }
}

impl InterpreterFactory for TestInterpreterFactory {
    fn identifier(&self) -> &str {
        "test"
    }

    fn create(&self, _config: &InterpreterConfig) -> anyhow::Result<Interpreter> {
        Ok(self.services.interpreter())
    }
}
