//! Element checks against an inspection result

use crate::channel::protocol::{InspectResult, UiElement};
use crate::models::workflow::{CheckType, ElementCheck};

/// Evaluate `check` against the elements of `inspection`.
///
/// The element is located by `resourceId` when given, otherwise by its
/// displayed text.
pub fn evaluate(check: &ElementCheck, inspection: &InspectResult) -> bool {
    let located = || {
        inspection
            .elements
            .iter()
            .filter(move |e| locates(check, e))
    };

    match check.check_type {
        CheckType::Exists => located().next().is_some(),
        CheckType::NotExists => located().next().is_none(),
        CheckType::Visible => located().any(|e| is_visible(e, inspection)),
        CheckType::TextEquals => {
            let expected = check.text.as_deref().unwrap_or_default();
            candidates(check, inspection).any(|e| e.display_text() == Some(expected))
        }
        CheckType::Contains => {
            let needle = check.text.as_deref().unwrap_or_default();
            candidates(check, inspection)
                .any(|e| e.display_text().is_some_and(|t| t.contains(needle)))
        }
    }
}

/// Elements whose text is compared: by resource ID when given, else all
fn candidates<'a>(
    check: &'a ElementCheck,
    inspection: &'a InspectResult,
) -> impl Iterator<Item = &'a UiElement> {
    inspection.elements.iter().filter(move |e| match &check.resource_id {
        Some(id) => matches_resource_id(e, id),
        None => true,
    })
}

fn locates(check: &ElementCheck, element: &UiElement) -> bool {
    match (&check.resource_id, &check.text) {
        (Some(id), _) => matches_resource_id(element, id),
        (None, Some(text)) => element.display_text() == Some(text.as_str()),
        (None, None) => false,
    }
}

/// Exact match, or the short form of a fully qualified `package:id/name`
fn matches_resource_id(element: &UiElement, id: &str) -> bool {
    match element.resource_id.as_deref() {
        Some(actual) => {
            actual == id
                || actual
                    .rsplit_once(":id/")
                    .is_some_and(|(_, short)| short == id)
        }
        None => false,
    }
}

fn is_visible(element: &UiElement, inspection: &InspectResult) -> bool {
    if element.bounds.is_empty() {
        return false;
    }
    let screen = inspection.screen_dimensions;
    if screen.width <= 0 || screen.height <= 0 {
        return true;
    }
    let b = element.bounds;
    b.left < screen.width && b.top < screen.height && b.left + b.width > 0 && b.top + b.height > 0
}
