use reprise_core::turn::Turn;

/// Select the maximal suffix of `turns` whose assistant-token sum stays
/// within `budget`.
///
/// Walks backward from the newest turn. When an assistant turn would push
/// the running sum over the budget the walk stops before it, so the pair
/// containing that turn is excluded as a whole. User turns cost nothing,
/// which keeps a trailing unanswered user turn in every window. Exclusion
/// is silent: older turns simply stop being sent to the backend.
pub fn build_window(turns: &[Turn], budget: u64) -> &[Turn] {
    let mut total: u64 = 0;
    let mut start = turns.len();

    for (i, turn) in turns.iter().enumerate().rev() {
        if turn.is_assistant() {
            match total.checked_add(turn.tokens()) {
                Some(sum) if sum <= budget => total = sum,
                _ => break,
            }
        }
        start = i;
    }

    &turns[start..]
}
