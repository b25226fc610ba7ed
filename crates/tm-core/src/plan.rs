//! Plan markdown parser.
//!
//! Turns the agent-authored plan into an ordered task list partitioned into
//! PR groups. A `### PR <n>: <name>` (or legacy `### Group <n>: <name>`)
//! heading opens a group; `- [ ]` / `- [x]` lines are tasks; indented bullet
//! lines directly beneath a task are collected as its context hints.
//!
//! Checkbox-looking lines inside fenced code blocks are parsed as real tasks.
//! Downstream task-count expectations depend on that behavior, so the parser
//! does not special-case code fences.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{ParsedTask, TaskComplexity, TaskGroup};

static GROUP_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^###\s+(?:PR|Group)\s+(\d+)\s*[:\-]\s*(.+?)\s*$").expect("valid regex")
});

static TASK_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-\s*\[([ xX])\]\s*(.+?)\s*$").expect("valid regex"));

static COMPLEXITY_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)`\[(coding|quick|general|debugging-qa)\]`").expect("valid regex")
});

pub const DEFAULT_GROUP_ID: &str = "default";
pub const DEFAULT_GROUP_NAME: &str = "Default";

// ---------------------------------------------------------------------------
// ParsedPlan
// ---------------------------------------------------------------------------

/// Result of parsing one plan document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPlan {
    pub tasks: Vec<ParsedTask>,
    pub groups: Vec<TaskGroup>,
}

impl ParsedPlan {
    pub fn total_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn completed_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_complete).count()
    }

    /// Incomplete tasks in document order.
    pub fn incomplete_tasks(&self) -> Vec<&ParsedTask> {
        self.tasks.iter().filter(|t| !t.is_complete).collect()
    }

    /// The group owning the task at `index`, if any.
    pub fn group_for_task(&self, index: usize) -> Option<&TaskGroup> {
        self.groups
            .iter()
            .find(|g| g.task_indices.contains(&index))
    }

    /// Tasks belonging to the group with `group_id`, in index order.
    pub fn tasks_in_group(&self, group_id: &str) -> Vec<&ParsedTask> {
        self.tasks
            .iter()
            .filter(|t| t.group_id == group_id)
            .collect()
    }

    /// True when every task in the group is marked complete.
    pub fn group_complete(&self, group_id: &str) -> bool {
        let tasks = self.tasks_in_group(group_id);
        !tasks.is_empty() && tasks.iter().all(|t| t.is_complete)
    }

    /// One line per group: `pr_1 'Schema Changes': 2/3 done`.
    pub fn summarize_groups(&self) -> String {
        let mut out = String::new();
        for group in &self.groups {
            let done = group
                .task_indices
                .iter()
                .filter(|&&i| self.tasks.get(i).is_some_and(|t| t.is_complete))
                .count();
            out.push_str(&format!(
                "{} '{}': {}/{} done\n",
                group.id,
                group.name,
                done,
                group.task_indices.len()
            ));
        }
        out
    }

    /// Re-render the plan as markdown.
    ///
    /// Parsing the rendered output yields the same task count, completion
    /// flags, and group assignments as the original document.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for group in &self.groups {
            if group.id != DEFAULT_GROUP_ID {
                if let Some(n) = group.pr_number() {
                    out.push_str(&format!("### PR {}: {}\n\n", n, group.name));
                }
            }
            for &index in &group.task_indices {
                let Some(task) = self.tasks.get(index) else {
                    continue;
                };
                let mark = if task.is_complete { "x" } else { " " };
                out.push_str(&format!("- [{}] {}\n", mark, task.description));
                for ctx in &task.context_lines {
                    out.push_str(&format!("  - {}\n", ctx));
                }
            }
            out.push('\n');
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a plan document into tasks and PR groups.
///
/// Tasks with no preceding group header are assigned to a synthetic
/// `default` group. Headers with no subsequent tasks still produce an
/// (empty) group.
pub fn parse_plan(plan_markdown: &str) -> ParsedPlan {
    let mut tasks: Vec<ParsedTask> = Vec::new();
    let mut groups: Vec<TaskGroup> = Vec::new();
    let mut current_group: Option<usize> = None;
    // Index into `tasks` of the task that may still collect context lines.
    let mut open_task: Option<usize> = None;

    for line in plan_markdown.lines() {
        if line.trim().is_empty() {
            // Blank lines end the context run for the preceding task.
            open_task = None;
            continue;
        }

        if let Some(caps) = GROUP_HEADER_RE.captures(line) {
            let number = &caps[1];
            let name = caps[2].trim().to_string();
            groups.push(TaskGroup {
                id: format!("pr_{}", number),
                name,
                task_indices: Vec::new(),
            });
            current_group = Some(groups.len() - 1);
            open_task = None;
            continue;
        }

        // Indented bullets directly beneath a task are context hints, not
        // tasks of their own.
        let indented = line.starts_with(' ') || line.starts_with('\t');
        if indented {
            let trimmed = line.trim_start();
            if let Some(task_idx) = open_task {
                if let Some(rest) = trimmed
                    .strip_prefix("- ")
                    .or_else(|| trimmed.strip_prefix("* "))
                {
                    tasks[task_idx].context_lines.push(rest.trim().to_string());
                    continue;
                }
            }
            open_task = None;
            continue;
        }

        if let Some(caps) = TASK_LINE_RE.captures(line) {
            let is_complete = caps[1].eq_ignore_ascii_case("x");
            let description = caps[2].to_string();

            let group_idx = match current_group {
                Some(i) => i,
                None => {
                    // First ungrouped task opens the synthetic default group.
                    let idx = groups
                        .iter()
                        .position(|g| g.id == DEFAULT_GROUP_ID)
                        .unwrap_or_else(|| {
                            groups.push(TaskGroup {
                                id: DEFAULT_GROUP_ID.to_string(),
                                name: DEFAULT_GROUP_NAME.to_string(),
                                task_indices: Vec::new(),
                            });
                            groups.len() - 1
                        });
                    current_group = Some(idx);
                    idx
                }
            };

            let index = tasks.len();
            groups[group_idx].task_indices.push(index);
            tasks.push(ParsedTask {
                index,
                description,
                group_id: groups[group_idx].id.clone(),
                group_name: groups[group_idx].name.clone(),
                is_complete,
                context_lines: Vec::new(),
            });
            open_task = Some(index);
            continue;
        }

        // Any other line interrupts the context run.
        open_task = None;
    }

    ParsedPlan { tasks, groups }
}

/// Parse the complexity tag from a task description.
///
/// The first `` `[coding]` `` / `` `[quick]` `` / `` `[general]` `` /
/// `` `[debugging-qa]` `` tag found (case-insensitive) wins; no tag defaults
/// to `Coding` so uncertain tasks get the most capable model. Returns the
/// complexity and the description with the tag stripped.
pub fn parse_task_complexity(description: &str) -> (TaskComplexity, String) {
    if let Some(caps) = COMPLEXITY_TAG_RE.captures(description) {
        let complexity = match caps[1].to_ascii_lowercase().as_str() {
            "quick" => TaskComplexity::Quick,
            "general" => TaskComplexity::General,
            "debugging-qa" => TaskComplexity::DebuggingQa,
            _ => TaskComplexity::Coding,
        };
        let whole = caps.get(0).expect("match exists");
        let mut cleaned = String::with_capacity(description.len());
        cleaned.push_str(&description[..whole.start()]);
        cleaned.push_str(&description[whole.end()..]);
        return (complexity, cleaned.trim().to_string());
    }
    (TaskComplexity::Coding, description.to_string())
}

/// Count of completed tasks in a plan document.
pub fn count_completed(plan_markdown: &str) -> usize {
    parse_plan(plan_markdown).completed_tasks()
}

/// Count of all tasks in a plan document.
pub fn count_total(plan_markdown: &str) -> usize {
    parse_plan(plan_markdown).total_tasks()
}

/// Rewrite the checkbox of the task at `index` to `[x]` in the stored
/// markdown, preserving all other lines byte-for-byte.
///
/// Returns `None` when the plan has no task at that index.
pub fn mark_task_complete(plan_markdown: &str, index: usize) -> Option<String> {
    let mut seen = 0usize;
    let mut out = String::with_capacity(plan_markdown.len());
    let mut found = false;

    for line in plan_markdown.lines() {
        let indented = line.starts_with(' ') || line.starts_with('\t');
        if !indented && TASK_LINE_RE.is_match(line) {
            if seen == index && !found {
                let rewritten = TASK_LINE_RE.replace(line, |caps: &regex::Captures<'_>| {
                    format!("- [x] {}", &caps[2])
                });
                out.push_str(&rewritten);
                found = true;
            } else {
                out.push_str(line);
            }
            seen += 1;
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    found.then_some(out)
}

/// Whitespace-insensitive plan comparison, used to decide whether an updated
/// plan actually changed and is worth persisting.
pub fn plans_equivalent(a: &str, b: &str) -> bool {
    let normalize = |s: &str| {
        s.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    };
    normalize(a) == normalize(b)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
