use super::error::{CompileError, Location};
use super::file::{Content, File};
use super::registry::Processor;
use super::restore;
use super::session::Session;
use super::standard;
use crate::config::StepSpec;
use log::debug;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Lint,
    Parser,
    Preprocessor,
    Standard,
    PostStandard,
    Postprocessor,
    Optimizer,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Lint => "lint",
            Stage::Parser => "parser",
            Stage::Preprocessor => "preprocessor",
            Stage::Standard => "standard",
            Stage::PostStandard => "postStandard",
            Stage::Postprocessor => "postprocessor",
            Stage::Optimizer => "optimizer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of a stage chain.
#[derive(Clone)]
pub enum Step {
    /// The reference extractors picked by content kind.
    Builtin,
    /// Looked up in the processor registry when the stage runs.
    Named {
        name: String,
        options: Map<String, Value>,
    },
    /// A processor handed over directly.
    Handle {
        processor: Arc<dyn Processor>,
        options: Map<String, Value>,
    },
}

impl Step {
    pub fn named(name: &str) -> Step {
        match name {
            "builtin" => Step::Builtin,
            _ => Step::Named {
                name: name.to_string(),
                options: Map::new(),
            },
        }
    }

    pub fn handle(processor: Arc<dyn Processor>) -> Step {
        Step::Handle {
            processor,
            options: Map::new(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Step::Builtin => "builtin",
            Step::Named { name, .. } => name,
            Step::Handle { processor, .. } => processor.name(),
        }
    }

    fn options(&self) -> Option<&Map<String, Value>> {
        match self {
            Step::Builtin => None,
            Step::Named { options, .. } | Step::Handle { options, .. } => Some(options),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Builtin => write!(f, "Builtin"),
            Step::Named { name, options } => f
                .debug_struct("Named")
                .field("name", name)
                .field("options", options)
                .finish(),
            Step::Handle { processor, options } => f
                .debug_struct("Handle")
                .field("processor", &processor.name())
                .field("options", options)
                .finish(),
        }
    }
}

impl From<StepSpec> for Step {
    fn from(spec: StepSpec) -> Self {
        match spec {
            StepSpec::Name(name) => Step::named(&name),
            StepSpec::WithOptions(step) => match Step::named(&step.name) {
                Step::Named { name, .. } => Step::Named {
                    name,
                    options: step.options,
                },
                builtin => builtin,
            },
        }
    }
}

/// Runs the chain configured for `stage` over the unit's current content.
/// Observers hear about the stage before any step runs. With `keep` the
/// steps only observe the content.
pub fn pipe(session: &mut Session, file: &mut File, stage: Stage, keep: bool) -> Result<(), CompileError> {
    let steps = match file.steps_for(stage) {
        Some(steps) => steps.clone(),
        None if stage == Stage::Standard => vec![Step::Builtin],
        None => vec![],
    };
    session.observers.stage(stage, file);

    let mut seen: Vec<&str> = vec![];
    for (index, step) in steps.iter().enumerate() {
        if seen.contains(&step.name()) {
            continue;
        }
        seen.push(step.name());

        let key = match step {
            Step::Handle { .. } => format!("{stage}.{index}"),
            _ => format!("{stage}.{}", step.name()),
        };
        let processor = match step {
            Step::Builtin => None,
            Step::Named { name, .. } => Some(session.registry.resolve(stage, name)?),
            Step::Handle { processor, .. } => Some(processor.clone()),
        };

        let mut settings = processor
            .as_ref()
            .map(|processor| processor.default_options())
            .unwrap_or_default();
        if let Some(Value::Object(configured)) = session.project.get(&key) {
            settings.extend(configured.clone());
        }
        if let Some(options) = step.options() {
            settings.extend(options.clone());
        }
        settings.insert(
            "filename".to_string(),
            Value::from(file.realpath.to_string_lossy().to_string()),
        );

        debug!("pipe [{key}] start");
        let content = file.get_content()?.clone();
        let result = match &processor {
            Some(processor) => processor.process(content, file, &settings),
            None => match content {
                Content::Text(text) => Ok(Content::Text(standard::builtin(
                    &mut session.lang,
                    &mut session.observers,
                    file,
                    &text,
                    &settings,
                ))),
                binary => Ok(binary),
            },
        };

        match result {
            Ok(output) => {
                if !keep {
                    file.set_content(output);
                }
                debug!("pipe [{key}] end");
            }
            Err(err) => {
                debug!("pipe [{key}] fail");
                session.guard.clear();
                return Err(CompileError::Step {
                    key,
                    message: err.message,
                    location: Location {
                        filename: err.filename.unwrap_or_else(|| file.realpath.clone()),
                        line: err.line,
                        column: err.column,
                    },
                });
            }
        }
    }
    Ok(())
}

/// `parser`, `preprocessor`, `standard`, the restore pass, `postprocessor`, `optimizer`.
pub fn process(session: &mut Session, file: &mut File) -> Result<(), CompileError> {
    for stage in [Stage::Parser, Stage::Preprocessor, Stage::Standard] {
        pipe(session, file, stage, false)?;
    }
    session.observers.stage(Stage::PostStandard, file);
    restore::post_standard(session, file)?;
    for stage in [Stage::Postprocessor, Stage::Optimizer] {
        pipe(session, file, stage, false)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::build::cache::FsCacheStore;
    use crate::build::error::ProcessorError;
    use crate::build::events::Observer;
    use crate::build::registry::{FnProcessor, ProcessorRegistry};
    use crate::build::session::CompileSettings;
    use crate::config;
    use crate::project_context::ProjectContext;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session(dir: &Path, json: &str, registry: ProcessorRegistry) -> Session {
        let project =
            ProjectContext::from_config(dir, config::parse_config(json).unwrap(), "dev").unwrap();
        let store = FsCacheStore::new(&dir.join(".cache"));
        Session::new(project, registry, Box::new(store), CompileSettings::default())
    }

    fn append(name: &str, suffix: &'static str) -> Arc<dyn Processor> {
        Arc::new(FnProcessor::new(name, move |content, _, _| {
            Ok(Content::Text(format!("{}{suffix}", content.as_text().unwrap_or_default())))
        }))
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::PostStandard.to_string(), "postStandard");
        assert_eq!(Stage::Optimizer.to_string(), "optimizer");
    }

    #[test]
    fn named_steps_run_in_order_and_duplicates_collapse() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "x").unwrap();
        let mut registry = ProcessorRegistry::new();
        registry
            .register(Stage::Parser, append("one", "1"))
            .register(Stage::Parser, append("two", "2"));
        let mut session = session(
            dir.path(),
            r#"{ "rules": [ { "match": "\\.js$", "parser": "one, two, one" } ] }"#,
            registry,
        );
        let mut file = session.file(&dir.path().join("a.js")).unwrap();
        pipe(&mut session, &mut file, Stage::Parser, false).unwrap();
        assert_eq!(file.text(), Some("x12"));
    }

    #[test]
    fn settings_merge_defaults_project_and_inline_options() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "").unwrap();
        let mut defaults = Map::new();
        defaults.insert("a".into(), Value::from("default"));
        defaults.insert("b".into(), Value::from("default"));
        defaults.insert("c".into(), Value::from("default"));
        let echo = FnProcessor::new("echo", |_, _, settings| {
            let pick = |key: &str| settings.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
            Ok(Content::Text(format!("{} {} {}", pick("a"), pick("b"), pick("c"))))
        })
        .with_defaults(defaults);
        let mut registry = ProcessorRegistry::new();
        registry.register(Stage::Optimizer, Arc::new(echo));
        let mut session = session(
            dir.path(),
            r#"{
                "settings": { "optimizer.echo": { "b": "project", "c": "project" } },
                "rules": [ { "match": "\\.js$", "optimizer": [ { "name": "echo", "c": "inline" } ] } ]
            }"#,
            registry,
        );
        let mut file = session.file(&dir.path().join("a.js")).unwrap();
        pipe(&mut session, &mut file, Stage::Optimizer, false).unwrap();
        assert_eq!(file.text(), Some("default project inline"));
    }

    #[test]
    fn keep_observes_without_replacing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "source").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let lint = FnProcessor::new("lint", move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Content::Text("replaced".into()))
        });
        let mut session = session(dir.path(), "{}", ProcessorRegistry::new());
        let mut file = session.file(&dir.path().join("a.js")).unwrap();
        file.set_steps(Stage::Lint, vec![Step::handle(Arc::new(lint))]);
        pipe(&mut session, &mut file, Stage::Lint, true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(file.text(), Some("source"));
    }

    #[test]
    fn failing_step_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.less"), "@a").unwrap();
        let broken = FnProcessor::new("less", |_, _, _| Err(ProcessorError::new("unexpected token").at(3, 7)));
        let mut registry = ProcessorRegistry::new();
        registry.register(Stage::Parser, Arc::new(broken));
        let mut session = session(
            dir.path(),
            r#"{ "rules": [ { "match": "\\.less$", "parser": "less" } ] }"#,
            registry,
        );
        let mut file = session.file(&dir.path().join("a.less")).unwrap();
        let err = pipe(&mut session, &mut file, Stage::Parser, false).unwrap_err();
        match &err {
            CompileError::Step { key, location, .. } => {
                assert_eq!(key, "parser.less");
                assert_eq!(location.line, Some(3));
                assert_eq!(location.column, Some(7));
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(err.to_string().starts_with("parser.less: unexpected token ["));
        assert!(err.to_string().ends_with("a.less:3:7]"));
    }

    #[test]
    fn unregistered_step_name_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "").unwrap();
        let mut session = session(
            dir.path(),
            r#"{ "rules": [ { "match": "\\.js$", "optimizer": "uglify" } ] }"#,
            ProcessorRegistry::new(),
        );
        let mut file = session.file(&dir.path().join("a.js")).unwrap();
        assert!(matches!(
            pipe(&mut session, &mut file, Stage::Optimizer, false),
            Err(CompileError::UnknownProcessor { .. })
        ));
    }

    #[test]
    fn standard_defaults_to_the_builtin_extractors() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "__uri('b.png')").unwrap();
        let mut session = session(dir.path(), "{}", ProcessorRegistry::new());
        let mut file = session.file(&dir.path().join("a.js")).unwrap();
        pipe(&mut session, &mut file, Stage::Standard, false).unwrap();
        let text = file.text().unwrap().to_string();
        assert_eq!(session.lang.scan(&text)[0].kind, "uri");
    }

    struct StageLog(Arc<Mutex<Vec<(Stage, String)>>>);

    impl Observer for StageLog {
        fn stage(&mut self, stage: Stage, file: &File) {
            let text = file.text().unwrap_or_default().to_string();
            self.0.lock().unwrap().push((stage, text));
        }
    }

    #[test]
    fn stage_observers_see_the_input_of_each_stage() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "var u = __uri('b.png');").unwrap();
        let mut registry = ProcessorRegistry::new();
        registry
            .register(Stage::Parser, append("one", "1"))
            .register(Stage::Optimizer, append("two", "2"));
        let mut session = session(
            dir.path(),
            r#"{ "rules": [ { "match": "\\.js$", "parser": "one", "optimizer": "two" } ] }"#,
            registry,
        );
        let log = Arc::new(Mutex::new(vec![]));
        session.add_observer(Box::new(StageLog(log.clone())));
        let mut file = session.file(&dir.path().join("a.js")).unwrap();
        file.get_content().unwrap();
        process(&mut session, &mut file).unwrap();
        assert_eq!(file.text(), Some("var u = 'b.png';12"));

        let log = log.lock().unwrap();
        let stages = log.iter().map(|(stage, _)| *stage).collect::<Vec<_>>();
        assert_eq!(
            stages,
            vec![
                Stage::Parser,
                Stage::Preprocessor,
                Stage::Standard,
                Stage::PostStandard,
                Stage::Postprocessor,
                Stage::Optimizer
            ]
        );
        assert_eq!(log[0].1, "var u = __uri('b.png');");
        assert_eq!(log[2].1, "var u = __uri('b.png');1");
        assert!(!session.lang.scan(&log[3].1).is_empty());
        assert_eq!(log[5].1, "var u = 'b.png';1");
    }
}
