//! Status workflow tests
//!
//! Property-based and unit tests for the transition tables:
//! - terminal statuses never move
//! - every rejected move names the entity and both statuses
//! - the documented happy paths are legal end to end

use proptest::prelude::*;
use shared::{
    check_transition, InvoiceStatus, ModerationUploadStatus, OrderStatus, ProductMoveStatus,
    RenderStatus, RetouchRequestStatus, STRequestStatus, Transition,
};

// ============================================================================
// Property Test Strategies
// ============================================================================

fn st_status() -> impl Strategy<Value = STRequestStatus> {
    prop::sample::select(STRequestStatus::ALL.to_vec())
}

fn retouch_status() -> impl Strategy<Value = RetouchRequestStatus> {
    prop::sample::select(RetouchRequestStatus::ALL.to_vec())
}

fn order_status() -> impl Strategy<Value = OrderStatus> {
    prop::sample::select(OrderStatus::ALL.to_vec())
}

fn move_status() -> impl Strategy<Value = ProductMoveStatus> {
    prop::sample::select(ProductMoveStatus::ALL.to_vec())
}

/// Walk `path` from a fresh row, failing at the first illegal step
fn walk<S: Transition>(path: &[S]) -> Result<(), String> {
    let mut current = None;
    for &next in path {
        check_transition(current, next).map_err(|e| e.to_string())?;
        current = Some(next);
    }
    Ok(())
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Property: terminal photo requests never change status
    #[test]
    fn test_terminal_st_requests_are_frozen(from in st_status(), to in st_status()) {
        if from.is_terminal() {
            prop_assert!(check_transition(Some(from), to).is_err());
        }
    }

    /// Property: terminal retouch requests never change status
    #[test]
    fn test_terminal_retouch_requests_are_frozen(
        from in retouch_status(),
        to in retouch_status(),
    ) {
        if from.is_terminal() {
            prop_assert!(check_transition(Some(from), to).is_err());
        }
    }

    /// Property: terminal orders never change status
    #[test]
    fn test_terminal_orders_are_frozen(from in order_status(), to in order_status()) {
        if from.is_terminal() {
            prop_assert!(check_transition(Some(from), to).is_err());
        }
    }

    /// Property: no status moves to itself
    #[test]
    fn test_no_self_transitions(status in move_status()) {
        prop_assert!(!status.can_transition_to(status));
    }

    /// Property: check_transition agrees with can_transition_to
    #[test]
    fn test_check_matches_table(from in st_status(), to in st_status()) {
        prop_assert_eq!(check_transition(Some(from), to).is_ok(), from.can_transition_to(to));
    }

    /// Property: error messages name entity, origin and target
    #[test]
    fn test_error_names_both_statuses(from in order_status(), to in order_status()) {
        if let Err(e) = check_transition(Some(from), to) {
            prop_assert_eq!(e.entity, "order");
            prop_assert_eq!(e.from, from.label().to_string());
            prop_assert_eq!(e.to, to.label().to_string());
        }
    }
}

// ============================================================================
// Unit Tests: Happy Paths
// ============================================================================

#[cfg(test)]
mod happy_path_tests {
    use super::*;

    #[test]
    fn test_photo_request_with_reshoot() {
        use STRequestStatus::*;
        assert!(walk(&[Draft, Created, Shooting, Shot, Shooting, Shot, Checked]).is_ok());
    }

    #[test]
    fn test_retouch_request_with_rework() {
        use RetouchRequestStatus::*;
        assert!(walk(&[Created, InProgress, OnReview, InProgress, OnReview, Completed]).is_ok());
    }

    #[test]
    fn test_order_released_and_reclaimed() {
        use OrderStatus::*;
        assert!(walk(&[Created, Assembling, Created, Assembling, Assembled, Accepting, Accepted]).is_ok());
    }

    #[test]
    fn test_product_round_trip_through_shipping() {
        use ProductMoveStatus::*;
        assert!(walk(&[Ordered, Assembled, Received, Defective, Shipped, Received]).is_ok());
    }

    #[test]
    fn test_invoice_sent_once() {
        assert!(walk(&[InvoiceStatus::Draft, InvoiceStatus::Sent]).is_ok());
        assert!(walk(&[InvoiceStatus::Draft, InvoiceStatus::Sent, InvoiceStatus::Sent]).is_err());
    }

    #[test]
    fn test_render_and_upload_verdicts() {
        assert!(walk(&[RenderStatus::Checking, RenderStatus::Unsuitable]).is_ok());
        assert!(walk(&[
            ModerationUploadStatus::Uploading,
            ModerationUploadStatus::Uploaded
        ])
        .is_ok());
    }
}

// ============================================================================
// Unit Tests: Rejected Moves
// ============================================================================

#[cfg(test)]
mod rejected_move_tests {
    use super::*;

    #[test]
    fn test_shooting_cannot_be_cancelled() {
        let err = check_transition(Some(STRequestStatus::Shooting), STRequestStatus::Cancelled)
            .unwrap_err();
        assert_eq!(err.entity, "st_request");
    }

    #[test]
    fn test_new_product_cannot_start_defective() {
        assert!(check_transition(None, ProductMoveStatus::Defective).is_err());
        assert!(check_transition(None, ProductMoveStatus::Shipped).is_err());
    }

    #[test]
    fn test_defective_cannot_be_marked_again() {
        assert!(check_transition(
            Some(ProductMoveStatus::Defective),
            ProductMoveStatus::Defective
        )
        .is_err());
    }

    #[test]
    fn test_accepted_order_cannot_be_cancelled() {
        assert!(check_transition(Some(OrderStatus::Accepted), OrderStatus::Cancelled).is_err());
    }

    #[test]
    fn test_review_cannot_skip_to_completed() {
        assert!(check_transition(
            Some(RetouchRequestStatus::InProgress),
            RetouchRequestStatus::Completed
        )
        .is_err());
    }
}
