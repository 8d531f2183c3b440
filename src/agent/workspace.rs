// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Files written into an agent's worktree before it starts.
//!
//! | File                      | Contents                                   |
//! |---------------------------|--------------------------------------------|
//! | `CLAUDE.md`               | system prompt: identity, branch, hub usage |
//! | `.hive/hive-commands.sh`  | shell helpers for the hub API              |

use std::path::Path;

use tracing::debug;

use super::types::LaunchSpec;

const SYSTEM_PROMPT: &str = include_str!("templates/system-prompt.md");
const HIVE_COMMANDS: &str = include_str!("templates/hive-commands.sh");

/// Specialty shown to agents spawned without one.
const GENERALIST: &str = "general (no specialty assigned)";

/// Render the system prompt for `spec`.
pub fn render_system_prompt(spec: &LaunchSpec) -> String {
    let repo = spec.repo_path.to_string_lossy();
    let specialty = spec
        .specialty
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(GENERALIST);
    render(
        SYSTEM_PROMPT,
        &[
            ("agent_id", spec.agent_id.as_str()),
            ("agent_name", spec.agent_name.as_str()),
            ("repo_path", &*repo),
            ("branch", spec.branch.as_str()),
            ("specialty", specialty),
            ("hub_url", spec.hub_url.as_str()),
        ],
    )
}

/// Replace `{{key}}` placeholders in one pass. Unknown keys are kept.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after[..end];
        match vars.iter().find(|(k, _)| *k == key) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[start..start + end + 4]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Write the system prompt and the hub helpers into the worktree.
pub async fn provision(spec: &LaunchSpec) -> std::io::Result<()> {
    let hive_dir = spec.worktree_path.join(".hive");
    tokio::fs::create_dir_all(&hive_dir).await?;

    let commands = hive_dir.join("hive-commands.sh");
    tokio::fs::write(&commands, HIVE_COMMANDS).await?;
    make_executable(&commands).await?;

    tokio::fs::write(
        spec.worktree_path.join("CLAUDE.md"),
        render_system_prompt(spec),
    )
    .await?;

    debug!(
        "Provisioned workspace for {} at {}",
        spec.agent_name,
        spec.worktree_path.display()
    );
    Ok(())
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
