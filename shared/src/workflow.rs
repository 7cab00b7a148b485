//! Transition tables for every status column.
//!
//! Services call [`check_transition`] before writing a status; nothing else
//! decides whether a move is legal.

use thiserror::Error;

use crate::models::{
    InvoiceStatus, ModerationUploadStatus, OrderStatus, ProductMoveStatus, RenderStatus,
    RetouchRequestStatus, STRequestStatus,
};

/// A status whose legal successors are known.
pub trait Transition: Copy + PartialEq + std::fmt::Debug + std::fmt::Display {
    /// Name of the entity this status belongs to, for error messages.
    const ENTITY: &'static str;

    fn can_transition_to(self, next: Self) -> bool;

    /// Statuses allowed for a freshly created row.
    fn is_initial(self) -> bool;

    fn is_terminal(self) -> bool;
}

/// Rejected status change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{entity}: cannot move from '{from}' to '{to}'")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub to: String,
}

/// Check a move from `from` (None for a new row) to `to`.
pub fn check_transition<S: Transition>(from: Option<S>, to: S) -> Result<(), TransitionError> {
    let allowed = match from {
        Some(current) => current.can_transition_to(to),
        None => to.is_initial(),
    };

    if allowed {
        Ok(())
    } else {
        Err(TransitionError {
            entity: S::ENTITY,
            from: from
                .map(|s| s.to_string())
                .unwrap_or_else(|| "(none)".to_string()),
            to: to.to_string(),
        })
    }
}

impl Transition for ProductMoveStatus {
    const ENTITY: &'static str = "product";

    fn can_transition_to(self, next: Self) -> bool {
        use ProductMoveStatus::*;
        matches!(
            (self, next),
            (Ordered, Assembled)
                | (Ordered, Received)
                | (Ordered, Defective)
                | (Assembled, Received)
                | (Assembled, Defective)
                | (Received, Shipped)
                | (Received, Defective)
                | (Defective, Received)
                | (Defective, Shipped)
                | (Shipped, Received)
        )
    }

    fn is_initial(self) -> bool {
        matches!(self, ProductMoveStatus::Ordered | ProductMoveStatus::Received)
    }

    fn is_terminal(self) -> bool {
        false
    }
}

impl Transition for STRequestStatus {
    const ENTITY: &'static str = "st_request";

    fn can_transition_to(self, next: Self) -> bool {
        use STRequestStatus::*;
        matches!(
            (self, next),
            (Draft, Created)
                | (Draft, Cancelled)
                | (Created, Draft)
                | (Created, Shooting)
                | (Created, Cancelled)
                | (Shooting, Shot)
                | (Shot, Checked)
                | (Shot, Shooting)
        )
    }

    fn is_initial(self) -> bool {
        matches!(self, STRequestStatus::Draft | STRequestStatus::Created)
    }

    fn is_terminal(self) -> bool {
        matches!(self, STRequestStatus::Checked | STRequestStatus::Cancelled)
    }
}

impl Transition for RetouchRequestStatus {
    const ENTITY: &'static str = "retouch_request";

    fn can_transition_to(self, next: Self) -> bool {
        use RetouchRequestStatus::*;
        matches!(
            (self, next),
            (Created, InProgress)
                | (Created, Cancelled)
                | (InProgress, OnReview)
                | (OnReview, Completed)
                | (OnReview, InProgress)
        )
    }

    fn is_initial(self) -> bool {
        self == RetouchRequestStatus::Created
    }

    fn is_terminal(self) -> bool {
        matches!(
            self,
            RetouchRequestStatus::Completed | RetouchRequestStatus::Cancelled
        )
    }
}

impl Transition for OrderStatus {
    const ENTITY: &'static str = "order";

    fn can_transition_to(self, next: Self) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Created, Assembling)
                | (Created, Cancelled)
                | (Assembling, Assembled)
                | (Assembling, Created)
                | (Assembled, Accepting)
                | (Accepting, Accepted)
        )
    }

    fn is_initial(self) -> bool {
        self == OrderStatus::Created
    }

    fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Accepted | OrderStatus::Cancelled)
    }
}

impl Transition for InvoiceStatus {
    const ENTITY: &'static str = "invoice";

    fn can_transition_to(self, next: Self) -> bool {
        matches!((self, next), (InvoiceStatus::Draft, InvoiceStatus::Sent))
    }

    fn is_initial(self) -> bool {
        self == InvoiceStatus::Draft
    }

    fn is_terminal(self) -> bool {
        self == InvoiceStatus::Sent
    }
}

impl Transition for RenderStatus {
    const ENTITY: &'static str = "render";

    fn can_transition_to(self, next: Self) -> bool {
        self == RenderStatus::Checking && next != RenderStatus::Checking
    }

    fn is_initial(self) -> bool {
        self == RenderStatus::Checking
    }

    fn is_terminal(self) -> bool {
        self != RenderStatus::Checking
    }
}

impl Transition for ModerationUploadStatus {
    const ENTITY: &'static str = "moderation_upload";

    fn can_transition_to(self, next: Self) -> bool {
        self == ModerationUploadStatus::Uploading && next != ModerationUploadStatus::Uploading
    }

    fn is_initial(self) -> bool {
        self == ModerationUploadStatus::Uploading
    }

    fn is_terminal(self) -> bool {
        self != ModerationUploadStatus::Uploading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_product_enters_as_ordered_or_received() {
        assert!(check_transition(None, ProductMoveStatus::Ordered).is_ok());
        assert!(check_transition(None, ProductMoveStatus::Received).is_ok());
        assert!(check_transition(None, ProductMoveStatus::Shipped).is_err());
        assert!(check_transition(None, ProductMoveStatus::Defective).is_err());
    }

    #[test]
    fn defective_is_not_reentrant() {
        let err = check_transition(
            Some(ProductMoveStatus::Defective),
            ProductMoveStatus::Defective,
        )
        .unwrap_err();
        assert_eq!(err.entity, "product");
        assert_eq!(err.from, "Брак");
    }

    #[test]
    fn terminal_statuses_have_no_successors() {
        for from in STRequestStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for to in STRequestStatus::ALL {
                assert!(!from.can_transition_to(*to), "{:?} -> {:?}", from, to);
            }
        }
        for from in OrderStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for to in OrderStatus::ALL {
                assert!(!from.can_transition_to(*to));
            }
        }
    }

    #[test]
    fn review_can_send_retouch_back() {
        assert!(RetouchRequestStatus::OnReview.can_transition_to(RetouchRequestStatus::InProgress));
        assert!(!RetouchRequestStatus::Completed.can_transition_to(RetouchRequestStatus::InProgress));
    }

    #[test]
    fn render_verdict_is_final() {
        assert!(check_transition(Some(RenderStatus::Checking), RenderStatus::Suitable).is_ok());
        assert!(check_transition(Some(RenderStatus::Unsuitable), RenderStatus::Suitable).is_err());
        assert!(check_transition(None, RenderStatus::Suitable).is_err());
    }

    #[test]
    fn upload_finishes_once() {
        use ModerationUploadStatus::*;
        assert!(Uploading.can_transition_to(Rejected));
        assert!(!Uploaded.can_transition_to(Rejected));
        assert!(!Uploading.can_transition_to(Uploading));
    }
}
