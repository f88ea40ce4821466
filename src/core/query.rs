use std::fmt::Write;

use crate::core::{
    activity::{Activity, ActivityStatus},
    service::Action,
};

/// Builds a Flux query selecting what a completed activity wrote.
///
/// Returns `None` when there is nothing to query: the activity did not
/// complete successfully, or it reported no `resultInfo`. The output is a pure
/// function of its inputs. Field filters from the action's
/// `presentationHints.defaultFields` are OR-combined in one clause and come
/// before the tag filters, which get one clause each in `outputTags` order.
pub fn build_result_query(activity: &Activity, action: Option<&Action>) -> Option<String> {
    if activity.status != ActivityStatus::Completed {
        return None;
    }
    let info = activity.result_info.as_ref()?;

    let mut query = String::new();
    // Writing into a String cannot fail.
    let _ = write!(query, "from(bucket: {})", flux_string(&info.bucket));
    // stop is exclusive in Flux, so step past max_timestamp to keep it.
    let _ = write!(
        query,
        "\n  |> range(start: time(v: {}), stop: time(v: {}))",
        info.min_timestamp,
        info.max_timestamp.saturating_add(1)
    );
    let _ = write!(
        query,
        "\n  |> filter(fn: (r) => r[\"_measurement\"] == {})",
        flux_string(&info.measurement)
    );

    let fields = action.map(Action::default_fields).unwrap_or(&[]);
    if !fields.is_empty() {
        let predicate = fields
            .iter()
            .map(|f| format!("r[\"_field\"] == {}", flux_string(f)))
            .collect::<Vec<_>>()
            .join(" or ");
        let _ = write!(query, "\n  |> filter(fn: (r) => {predicate})");
    }

    for tag in &info.output_tags {
        let _ = write!(
            query,
            "\n  |> filter(fn: (r) => r[{}] == {})",
            flux_string(&tag.name),
            flux_string(&tag.value)
        );
    }

    Some(query)
}

fn flux_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '$' => out.push_str("\\$"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
