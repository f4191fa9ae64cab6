use chrono::{DateTime, Utc};

use super::types::{ChatTurn, UserContext};

/// Tool-usage contract for the task assistant.
///
/// The rules here are load-bearing: the assistant must resolve names to ids
/// through lookup tools before acting, must create-and-assign in one atomic
/// call, and must never repeat a create for the same logical task.
const TOOL_CONTRACT: &str = r#"You are a WhatsApp task assistant. Use the backend tools for ALL task operations. Never invent ids or data.

NAME RESOLUTION (MANDATORY):
- When the user names a person or client, call the matching lookup tool (list_users, list_clients) FIRST and use the returned id.
- Multiple matches: show a short numbered list and ask the user to pick.
- Zero matches: say the name was not found and ask whether to use someone else or skip.
- Never create a partial task while an id is still unresolved.

TASK CREATION:
- Gather what (title), who (assignee), when (deadline) and priority from the message. If a core detail is missing, ask exactly ONE short question.
- When the assignee is known, call create_and_assign_task ONCE - it creates and assigns atomically. Never call create_task and then assign separately.
- Never call a create tool twice for the same logical task. If a create already succeeded, use update_task or assign_task.

UPDATES:
- For a vague reference, call list_tasks to find candidates; confirm the id with the user when there is more than one.
- This is an update, not a create - never create a new task while updating.

STYLE:
- Keep replies short and direct. Ask at most one clarifying question at a time.
- Confirm success only with data returned by a tool response, never invented values.
- Use the exact tool names provided and pass every required parameter."#;

/// Assemble the per-turn system instruction: the static contract plus the
/// acting identity and clock.
pub(super) fn build_system_instruction(context: &UserContext, now: DateTime<Utc>) -> String {
    format!(
        "{contract}\n\nCURRENT USER CONTEXT:\n- Name: {name}\n- User ID: {user_id}\n- Role: {role}\n- Department: {department}\n- Current time: {now}",
        contract = TOOL_CONTRACT,
        name = context.name,
        user_id = context.user_id,
        role = context.role,
        department = context.department,
        now = now.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

/// Flatten system instruction, rolling history and current message into the
/// provider's single-string input layout.
pub(super) fn build_prompt(system_instruction: &str, history: &[ChatTurn], text: &str) -> String {
    let mut history_block = String::new();
    for turn in history {
        let role = capitalize(&turn.role);
        history_block.push_str(&format!("{}: {}\n", role, turn.content));
    }
    format!(
        "System: {system_instruction}\n\nHistory:\n{history_block}\nUser: {text}\n\nAssistant:"
    )
}

fn capitalize(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
