//! Task definition loading.
//!
//! Loading happens in two phases: the YAML file is decoded into a raw tree
//! where every option is optional, then a resolution pass applies defaults
//! and validates the shape, producing the task tree the scheduler runs.

use std::{fs, path::Path};

use log::info;
use serde::Deserialize;

use crate::models::{
    error::{ConfigError, ConfigResult},
    task::Task,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub stop_on_failure: bool,
    pub show_steps: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            stop_on_failure: true,
            show_steps: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskTree {
    pub options: Options,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawOptions {
    stop_on_failure: Option<bool>,
    show_steps: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawTask {
    name: Option<String>,
    cmd: Option<String>,
    tasks: Option<Vec<RawTask>>,
    stop_on_failure: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default, alias = "options")]
    config: RawOptions,
    #[serde(default)]
    tasks: Vec<RawTask>,
}

pub fn load(path: &Path) -> ConfigResult<TaskTree> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let tree = parse(&text)?;
    info!("Loaded {} step(s) from {}", tree.tasks.len(), path.display());
    Ok(tree)
}

pub fn parse(yaml: &str) -> ConfigResult<TaskTree> {
    let raw: RawConfig = serde_yaml::from_str(yaml)?;
    resolve(raw)
}

fn resolve(raw: RawConfig) -> ConfigResult<TaskTree> {
    let defaults = Options::default();
    let options = Options {
        stop_on_failure: raw.config.stop_on_failure.unwrap_or(defaults.stop_on_failure),
        show_steps: raw.config.show_steps.unwrap_or(defaults.show_steps),
    };
    if raw.tasks.is_empty() {
        return Err(ConfigError::Invalid("no tasks defined".into()));
    }
    let tasks = raw
        .tasks
        .into_iter()
        .enumerate()
        .map(|(idx, task)| resolve_step(task, idx + 1, options.stop_on_failure))
        .collect::<ConfigResult<Vec<_>>>()?;
    Ok(TaskTree { options, tasks })
}

fn resolve_step(raw: RawTask, step: usize, default_stop: bool) -> ConfigResult<Task> {
    let stop_on_failure = raw.stop_on_failure.unwrap_or(default_stop);
    match (raw.cmd, raw.tasks) {
        (Some(cmd), None) => resolve_command(raw.name, cmd, stop_on_failure, step),
        (None, Some(children)) => {
            if children.is_empty() {
                return Err(ConfigError::Invalid(format!("step {} has an empty task list", step)));
            }
            let children = children
                .into_iter()
                .map(|child| {
                    if child.tasks.is_some() {
                        return Err(ConfigError::Invalid(format!(
                            "step {} nests a group inside a group",
                            step
                        )));
                    }
                    let cmd = child.cmd.ok_or_else(|| {
                        ConfigError::Invalid(format!("step {} has a task without `cmd`", step))
                    })?;
                    let child_stop = child.stop_on_failure.unwrap_or(stop_on_failure);
                    resolve_command(child.name, cmd, child_stop, step)
                })
                .collect::<ConfigResult<Vec<_>>>()?;
            Ok(Task::group(raw.name, children, stop_on_failure))
        }
        (Some(_), Some(_)) => Err(ConfigError::Invalid(format!(
            "step {} sets both `cmd` and `tasks`",
            step
        ))),
        (None, None) => Err(ConfigError::Invalid(format!(
            "step {} needs either `cmd` or `tasks`",
            step
        ))),
    }
}

fn resolve_command(
    name: Option<String>,
    cmd: String,
    stop_on_failure: bool,
    step: usize,
) -> ConfigResult<Task> {
    let cmd = cmd.trim().to_string();
    if cmd.is_empty() {
        return Err(ConfigError::Invalid(format!("step {} has an empty `cmd`", step)));
    }
    Ok(Task::command(name, cmd, stop_on_failure))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::models::task::TaskKind;

    #[test]
    fn defaults_apply_when_options_are_missing() {
        let tree = parse("tasks:\n  - cmd: echo hi\n").unwrap();
        assert_eq!(tree.options, Options::default());
        assert_eq!(tree.tasks.len(), 1);
        assert!(tree.tasks[0].stop_on_failure);
        assert_eq!(tree.tasks[0].name, "echo hi");
    }

    #[test]
    fn global_default_flows_into_tasks() {
        let yaml = r#"
config:
  stop-on-failure: false
  show-steps: false
tasks:
  - cmd: make
  - name: strict
    cmd: make test
    stop-on-failure: true
"#;
        let tree = parse(yaml).unwrap();
        assert!(!tree.options.show_steps);
        assert!(!tree.tasks[0].stop_on_failure);
        assert!(tree.tasks[1].stop_on_failure);
        assert_eq!(tree.tasks[1].name, "strict");
    }

    #[test]
    fn options_alias_is_accepted() {
        let tree = parse("options:\n  show-steps: false\ntasks:\n  - cmd: ls\n").unwrap();
        assert!(!tree.options.show_steps);
        assert!(tree.options.stop_on_failure);
    }

    #[test]
    fn groups_assign_rows_and_inherit_stop_on_failure() {
        let yaml = r#"
tasks:
  - name: checks
    stop-on-failure: false
    tasks:
      - cmd: cargo fmt --check
      - cmd: cargo clippy
        stop-on-failure: true
      - name: tests
        cmd: cargo test --workspace --all-features
"#;
        let tree = parse(yaml).unwrap();
        let group = &tree.tasks[0];
        assert_eq!(group.name, "checks");
        let TaskKind::Group(children) = &group.kind else {
            panic!("expected a group");
        };
        let rows: Vec<_> = children.iter().map(|child| child.line_idx).collect();
        assert_eq!(rows, vec![0, 1, 2]);
        let stops: Vec<_> = children.iter().map(|child| child.stop_on_failure).collect();
        assert_eq!(stops, vec![false, true, false]);
        assert_eq!(children[2].name, "tests");
    }

    #[test]
    fn rejects_malformed_trees() {
        let cases = [
            "tasks: []\n",
            "tasks:\n  - name: nothing\n",
            "tasks:\n  - cmd: ls\n    tasks:\n      - cmd: ls\n",
            "tasks:\n  - tasks: []\n",
            "tasks:\n  - tasks:\n      - tasks:\n          - cmd: ls\n",
            "tasks:\n  - cmd: '   '\n",
        ];
        for yaml in cases {
            assert!(
                matches!(parse(yaml), Err(ConfigError::Invalid(_))),
                "accepted: {yaml}"
            );
        }
    }

    #[test]
    fn rejects_unknown_keys_and_bad_yaml() {
        assert!(matches!(
            parse("tasks:\n  - command: ls\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(parse("tasks: [\n"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tasks:\n  - cmd: \"true\"").unwrap();
        let tree = load(file.path()).unwrap();
        assert_eq!(tree.tasks[0].argv(), vec!["true"]);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("missing.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
