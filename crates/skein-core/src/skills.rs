//! Skills: markdown-described capability packs.
//!
//! A skill is a directory containing a `SKILL.md` whose frontmatter
//! (between `---` fences) declares its name, description, and optional
//! command dispatch. Skills contribute a section to the agent's system
//! prompt and may expose a slash command that dispatches straight to a
//! tool.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// How a skill command maps onto a tool invocation. Only the `tool`
/// dispatch kind is supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillDispatch {
    /// Model-facing tool name (e.g. `browser_fetch`).
    pub tool_name: String,
    /// Argument mode; `raw` passes the remaining text through.
    pub arg_mode: String,
}

/// A loaded skill.
#[derive(Debug, Clone)]
pub struct SkillEntry {
    /// Sanitized skill name; doubles as the command name.
    pub name: String,
    /// One-line description for the prompt section.
    pub description: String,
    /// Full SKILL.md body (frontmatter removed).
    pub content: String,
    /// Directory containing the skill.
    pub base_dir: PathBuf,
    /// Whether `/name` is available to users.
    pub user_invocable: bool,
    /// Whether the skill is excluded from the model's prompt section.
    pub disable_model_invocation: bool,
    /// Tool dispatch for the command form, when declared.
    pub dispatch: Option<SkillDispatch>,
}

/// Sanitize a skill name into the command charset.
fn sanitize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect()
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "true" | "yes" | "1")
}

/// Parse a SKILL.md file into frontmatter pairs and the body.
fn parse_skill_md(content: &str) -> (Vec<(String, String)>, String) {
    let mut lines = content.lines();
    let Some(first) = lines.next() else {
        return (Vec::new(), String::new());
    };
    if first.trim() != "---" {
        return (Vec::new(), content.to_string());
    }

    let mut frontmatter = Vec::new();
    let mut body_lines: Vec<&str> = Vec::new();
    let mut in_front = true;
    for line in lines {
        if in_front {
            if line.trim() == "---" {
                in_front = false;
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                frontmatter.push((key.trim().to_string(), value.trim().to_string()));
            }
        } else {
            body_lines.push(line);
        }
    }
    (frontmatter, body_lines.join("\n").trim().to_string())
}

/// Load one skill from its directory.
fn load_skill(dir: &Path) -> Option<SkillEntry> {
    let skill_md = dir.join("SKILL.md");
    let content = std::fs::read_to_string(&skill_md).ok()?;
    let (frontmatter, body) = parse_skill_md(&content);

    let mut entry = SkillEntry {
        name: String::new(),
        description: String::new(),
        content: body,
        base_dir: dir.to_path_buf(),
        user_invocable: true,
        disable_model_invocation: false,
        dispatch: None,
    };

    let mut dispatch_kind = String::new();
    let mut dispatch_tool = String::new();
    let mut dispatch_arg_mode = "raw".to_string();

    for (key, value) in frontmatter {
        match key.as_str() {
            "name" => entry.name = sanitize_name(&value),
            "description" => entry.description = value,
            "user-invocable" => entry.user_invocable = parse_bool(&value),
            "disable-model-invocation" => entry.disable_model_invocation = parse_bool(&value),
            "command-dispatch" => dispatch_kind = value,
            "command-tool" => dispatch_tool = value,
            "command-arg-mode" => dispatch_arg_mode = value,
            _ => {}
        }
    }

    // A missing name falls back to the directory name.
    if entry.name.is_empty() {
        entry.name = sanitize_name(&dir.file_name()?.to_string_lossy());
    }
    if entry.name.is_empty() {
        return None;
    }

    if dispatch_kind == "tool" && !dispatch_tool.is_empty() {
        entry.dispatch = Some(SkillDispatch {
            tool_name: dispatch_tool,
            arg_mode: dispatch_arg_mode,
        });
    } else if !dispatch_kind.is_empty() && dispatch_kind != "tool" {
        debug!(skill = %entry.name, kind = %dispatch_kind, "unsupported dispatch kind, command disabled");
    }

    Some(entry)
}

/// All loaded skills.
#[derive(Debug, Default)]
pub struct SkillSet {
    entries: Vec<SkillEntry>,
}

impl SkillSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover skills under `<dir>/*/SKILL.md` for each directory, in
    /// order. Later skills with a duplicate name are skipped.
    pub fn load(dirs: &[PathBuf]) -> Self {
        let mut entries: Vec<SkillEntry> = Vec::new();
        for dir in dirs {
            let mut skill_dirs: Vec<PathBuf> = WalkDir::new(dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_dir())
                .map(|e| e.into_path())
                .collect();
            skill_dirs.sort();

            for skill_dir in skill_dirs {
                if !skill_dir.join("SKILL.md").is_file() {
                    continue;
                }
                match load_skill(&skill_dir) {
                    Some(entry) => {
                        if entries.iter().any(|e| e.name == entry.name) {
                            warn!(skill = %entry.name, "duplicate skill name, skipping");
                            continue;
                        }
                        debug!(skill = %entry.name, dir = %skill_dir.display(), "loaded skill");
                        entries.push(entry);
                    }
                    None => warn!(dir = %skill_dir.display(), "failed to load skill"),
                }
            }
        }
        Self { entries }
    }

    /// All skills.
    pub fn entries(&self) -> &[SkillEntry] {
        &self.entries
    }

    /// Number of skills.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no skills are loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The skills section of the system prompt, or `None` when no skill
    /// is advertisable.
    pub fn prompt_section(&self) -> Option<String> {
        let visible: Vec<&SkillEntry> = self
            .entries
            .iter()
            .filter(|e| !e.disable_model_invocation)
            .collect();
        if visible.is_empty() {
            return None;
        }
        let mut out = String::from("## Skills\n");
        for skill in visible {
            out.push_str(&format!("- {}: {}\n", skill.name, skill.description));
        }
        Some(out)
    }

    /// Resolve a `/`-prefixed message to a skill command and its args.
    ///
    /// Accepts `/name args` and the prefixed `/skill name args` form.
    /// Only user-invocable skills with a tool dispatch resolve.
    pub fn resolve_command<'a>(&'a self, text: &str) -> Option<(&'a SkillEntry, String)> {
        let text = text.strip_prefix('/')?;
        let (first, rest) = split_token(text);

        let (name, args) = if first == "skill" {
            let (name, args) = split_token(rest);
            (name.to_string(), args.to_string())
        } else {
            (first.to_string(), rest.to_string())
        };

        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name && e.user_invocable && e.dispatch.is_some())?;
        Some((entry, args.trim().to_string()))
    }
}

/// Split off the first whitespace-delimited token.
fn split_token(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim_start()),
        None => (text, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, dir_name: &str, content: &str) {
        let dir = root.join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SKILL.md"), content).unwrap();
    }

    #[test]
    fn parses_frontmatter_and_body() {
        let (front, body) = parse_skill_md("---\nname: Weather\ndescription: Get weather\n---\nUse the browser tool.\n");
        assert_eq!(front.len(), 2);
        assert_eq!(front[0], ("name".to_string(), "Weather".to_string()));
        assert_eq!(body, "Use the browser tool.");
    }

    #[test]
    fn no_frontmatter_is_all_body() {
        let (front, body) = parse_skill_md("Just instructions.\n");
        assert!(front.is_empty());
        assert_eq!(body.trim(), "Just instructions.");
    }

    #[test]
    fn loads_and_advertises_skills() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "weather",
            "---\nname: Weather\ndescription: Look up the weather\ncommand-dispatch: tool\ncommand-tool: browser_fetch\n---\nFetch the forecast page.\n",
        );
        write_skill(
            dir.path(),
            "quiet-skill",
            "---\ndescription: Internal helper\ndisable-model-invocation: true\n---\nbody\n",
        );

        let skills = SkillSet::load(&[dir.path().to_path_buf()]);
        assert_eq!(skills.len(), 2);

        let prompt = skills.prompt_section().unwrap();
        assert!(prompt.contains("- weather: Look up the weather"));
        assert!(!prompt.contains("quiet-skill"));
    }

    #[test]
    fn name_falls_back_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "My-Skill", "---\ndescription: x\n---\nbody\n");
        let skills = SkillSet::load(&[dir.path().to_path_buf()]);
        assert_eq!(skills.entries()[0].name, "my-skill");
    }

    #[test]
    fn resolve_command_both_forms() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "weather",
            "---\nname: weather\ndescription: d\ncommand-dispatch: tool\ncommand-tool: browser_fetch\n---\nbody\n",
        );
        let skills = SkillSet::load(&[dir.path().to_path_buf()]);

        let (entry, args) = skills.resolve_command("/weather London today").unwrap();
        assert_eq!(entry.name, "weather");
        assert_eq!(args, "London today");

        let (entry, args) = skills.resolve_command("/skill weather Paris").unwrap();
        assert_eq!(entry.name, "weather");
        assert_eq!(args, "Paris");

        assert!(skills.resolve_command("/unknown x").is_none());
        assert!(skills.resolve_command("no slash").is_none());
    }

    #[test]
    fn non_invocable_skill_keeps_prompt_loses_command() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "internal",
            "---\nname: internal\ndescription: visible to model\nuser-invocable: false\ncommand-dispatch: tool\ncommand-tool: browser_fetch\n---\nbody\n",
        );
        let skills = SkillSet::load(&[dir.path().to_path_buf()]);
        assert!(skills.prompt_section().unwrap().contains("internal"));
        assert!(skills.resolve_command("/internal x").is_none());
    }

    #[test]
    fn skill_without_dispatch_does_not_resolve() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "notes",
            "---\nname: notes\ndescription: prompt-only skill\n---\nbody\n",
        );
        let skills = SkillSet::load(&[dir.path().to_path_buf()]);
        assert!(skills.resolve_command("/notes hi").is_none());
        assert!(skills.prompt_section().is_some());
    }
}
