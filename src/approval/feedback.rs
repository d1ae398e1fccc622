use super::types::EvaluationStatus;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackContext {
    pub status: EvaluationStatus,
    pub adjusted_score: f64,
    pub effective_threshold: f64,
    pub attempt_number: u32,
    pub carryover: u32,
}

pub fn generate_feedback(ctx: &FeedbackContext) -> String {
    match ctx.status {
        EvaluationStatus::Approved => approved_message(ctx),
        EvaluationStatus::Rejected => rejected_message(ctx),
        EvaluationStatus::Pending => format!(
            "Attempt {} is awaiting evaluation.",
            ctx.attempt_number
        ),
    }
}

fn approved_message(ctx: &FeedbackContext) -> String {
    let score = format_points(ctx.adjusted_score);
    let threshold = format_points(ctx.effective_threshold);

    if ctx.attempt_number <= 1 {
        return format!("Approved on the first attempt with a score of {score} (required: {threshold}).");
    }

    let mut message = format!(
        "Approved on attempt {} with an adjusted score of {score} (required: {threshold}).",
        ctx.attempt_number
    );
    if ctx.carryover > 0 {
        message.push_str(&format!(
            " A penalty of {} from previous attempts was applied.",
            plural_points(ctx.carryover as f64)
        ));
    }
    message
}

fn rejected_message(ctx: &FeedbackContext) -> String {
    let gap = (ctx.effective_threshold - ctx.adjusted_score).max(0.0);
    let mut message = format!(
        "Not approved: score {} is {} below the required {}.",
        format_points(ctx.adjusted_score),
        plural_points(gap),
        format_points(ctx.effective_threshold),
    );
    if ctx.carryover > 0 {
        message.push_str(&format!(
            " A penalty of {} from previous attempts was applied.",
            plural_points(ctx.carryover as f64)
        ));
    }
    message.push_str(&format!(" This was attempt {}.", ctx.attempt_number));
    message
}

fn format_points(value: f64) -> String {
    if value.fract().abs() < 1e-9 {
        return format!("{value:.0}");
    }
    let formatted = format!("{value:.2}");
    formatted.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn plural_points(value: f64) -> String {
    let unit = if (value - 1.0).abs() < 1e-9 { "point" } else { "points" };
    format!("{} {unit}", format_points(value))
}
