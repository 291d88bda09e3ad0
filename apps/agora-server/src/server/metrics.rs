use std::{collections::HashMap, fmt::Write as _};

use super::core::{MetricsState, METRICS_STATE};

pub(crate) fn metrics_state() -> &'static MetricsState {
    METRICS_STATE.get_or_init(MetricsState::default)
}

pub(crate) fn render_metrics() -> String {
    let auth_failures = metrics_state()
        .auth_failures
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let ws_disconnects = metrics_state()
        .ws_disconnects
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let messages_emitted = metrics_state()
        .messages_emitted
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let messages_dropped = metrics_state()
        .messages_dropped
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let unknown_requests = metrics_state()
        .unknown_requests
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let frames_rejected = metrics_state()
        .frames_rejected
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());

    let mut output = String::new();
    output.push_str("# HELP agora_auth_failures_total Count of auth-related failures by reason\n");
    output.push_str("# TYPE agora_auth_failures_total counter\n");
    let mut auth_entries: Vec<_> = auth_failures.into_iter().collect();
    auth_entries.sort_by_key(|(reason, _)| *reason);
    for (reason, value) in auth_entries {
        let _ = writeln!(
            output,
            "agora_auth_failures_total{{reason=\"{reason}\"}} {value}"
        );
    }

    output.push_str(
        "# HELP agora_ws_disconnects_total Count of websocket disconnect events by reason\n",
    );
    output.push_str("# TYPE agora_ws_disconnects_total counter\n");
    let mut ws_entries: Vec<_> = ws_disconnects.into_iter().collect();
    ws_entries.sort_by_key(|(reason, _)| *reason);
    for (reason, value) in ws_entries {
        let _ = writeln!(
            output,
            "agora_ws_disconnects_total{{reason=\"{reason}\"}} {value}"
        );
    }

    output.push_str(
        "# HELP agora_messages_emitted_total Count of outbound channel messages by scope and type\n",
    );
    output.push_str("# TYPE agora_messages_emitted_total counter\n");
    let mut emitted_entries: Vec<_> = messages_emitted.into_iter().collect();
    emitted_entries.sort_by(|((a_scope, a_type), _), ((b_scope, b_type), _)| {
        a_scope.cmp(b_scope).then(a_type.cmp(b_type))
    });
    for ((scope, message_type), value) in emitted_entries {
        let _ = writeln!(
            output,
            "agora_messages_emitted_total{{scope=\"{scope}\",type=\"{message_type}\"}} {value}"
        );
    }

    output.push_str(
        "# HELP agora_messages_dropped_total Count of dropped outbound channel messages by scope, type, and reason\n",
    );
    output.push_str("# TYPE agora_messages_dropped_total counter\n");
    let mut dropped_entries: Vec<_> = messages_dropped.into_iter().collect();
    dropped_entries.sort_by(
        |((a_scope, a_type, a_reason), _), ((b_scope, b_type, b_reason), _)| {
            a_scope
                .cmp(b_scope)
                .then(a_type.cmp(b_type))
                .then(a_reason.cmp(b_reason))
        },
    );
    for ((scope, message_type, reason), value) in dropped_entries {
        let _ = writeln!(
            output,
            "agora_messages_dropped_total{{scope=\"{scope}\",type=\"{message_type}\",reason=\"{reason}\"}} {value}"
        );
    }

    output.push_str(
        "# HELP agora_unknown_requests_total Count of unrecognized request types received\n",
    );
    output.push_str("# TYPE agora_unknown_requests_total counter\n");
    let mut unknown_entries: Vec<_> = unknown_requests.into_iter().collect();
    unknown_entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (message_type, value) in unknown_entries {
        let _ = writeln!(
            output,
            "agora_unknown_requests_total{{type=\"{message_type}\"}} {value}"
        );
    }

    output.push_str(
        "# HELP agora_frames_rejected_total Count of inbound frames rejected before dispatch by reason\n",
    );
    output.push_str("# TYPE agora_frames_rejected_total counter\n");
    let mut rejected_entries: Vec<_> = frames_rejected.into_iter().collect();
    rejected_entries.sort_by_key(|(reason, _)| *reason);
    for (reason, value) in rejected_entries {
        let _ = writeln!(
            output,
            "agora_frames_rejected_total{{reason=\"{reason}\"}} {value}"
        );
    }

    output
}

pub(crate) fn record_auth_failure(reason: &'static str) {
    if let Ok(mut counters) = metrics_state().auth_failures.lock() {
        let entry = counters.entry(reason).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_ws_disconnect(reason: &'static str) {
    if let Ok(mut counters) = metrics_state().ws_disconnects.lock() {
        let entry = counters.entry(reason).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_message_emitted(scope: &'static str, message_type: &str) {
    if let Ok(mut counters) = metrics_state().messages_emitted.lock() {
        let entry = counters
            .entry((scope.to_owned(), message_type.to_owned()))
            .or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_message_dropped(
    scope: &'static str,
    message_type: &str,
    reason: &'static str,
) {
    if let Ok(mut counters) = metrics_state().messages_dropped.lock() {
        let entry = counters
            .entry((scope.to_owned(), message_type.to_owned(), reason.to_owned()))
            .or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_unknown_request(message_type: &str) {
    if let Ok(mut counters) = metrics_state().unknown_requests.lock() {
        let entry = counters.entry(message_type.to_owned()).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_frame_rejected(reason: &'static str) {
    if let Ok(mut counters) = metrics_state().frames_rejected.lock() {
        let entry = counters.entry(reason).or_insert(0);
        *entry += 1;
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{metrics_state, record_message_dropped, record_unknown_request, render_metrics};

    #[test]
    fn dropped_messages_are_counted_per_scope_type_and_reason() {
        let message_type = format!("drop_test_{}", Uuid::new_v4());
        record_message_dropped("peer", &message_type, "full_queue");

        let dropped = metrics_state()
            .messages_dropped
            .lock()
            .expect("dropped metrics mutex should not be poisoned");
        let key = (
            String::from("peer"),
            message_type,
            String::from("full_queue"),
        );
        assert_eq!(dropped.get(&key).copied(), Some(1));
    }

    #[test]
    fn unknown_request_shows_up_in_rendered_exposition() {
        let message_type = format!("mystery_{}", Uuid::new_v4());
        record_unknown_request(&message_type);
        let rendered = render_metrics();
        assert!(rendered.contains(&message_type));
        assert!(rendered.contains("agora_unknown_requests_total"));
    }
}
