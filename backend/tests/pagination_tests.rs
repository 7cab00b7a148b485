//! Pagination and role guard tests

use proptest::prelude::*;
use shared::{PaginatedResponse, Pagination, Role, DEFAULT_PER_PAGE, MAX_PER_PAGE};

proptest! {
    /// Property: normalized pagination always stays in bounds
    #[test]
    fn test_pagination_bounds(page in 0u32..10_000, per_page in 0u32..10_000) {
        let p = Pagination { page, per_page }.normalized();
        prop_assert!(p.page >= 1);
        prop_assert!(p.per_page >= 1 && p.per_page <= MAX_PER_PAGE);
        prop_assert_eq!(
            Pagination { page, per_page }.offset(),
            i64::from(p.page - 1) * i64::from(p.per_page)
        );
    }

    /// Property: total_pages covers every item
    #[test]
    fn test_total_pages(total in 0u64..5_000, per_page in 1u32..=100) {
        let pagination = Pagination { page: 1, per_page };
        let response: PaginatedResponse<u8> = PaginatedResponse::new(Vec::new(), &pagination, total);
        let pages = u64::from(response.pagination.total_pages);

        prop_assert!(pages * u64::from(per_page) >= total);
        if total > 0 {
            prop_assert!((pages - 1) * u64::from(per_page) < total);
        } else {
            prop_assert_eq!(pages, 0);
        }
    }
}

#[test]
fn test_query_defaults() {
    let p: Pagination = serde_json::from_str("{}").unwrap();
    assert_eq!(p.page, 1);
    assert_eq!(p.per_page, DEFAULT_PER_PAGE);
}

#[test]
fn test_admin_passes_every_guard() {
    assert!(Role::Admin.is_allowed(&[Role::Moderator]));
    assert!(Role::Admin.is_allowed(&[]));
}

#[test]
fn test_role_guard_membership() {
    let photo_review = [Role::Manager, Role::SeniorPhotographer];
    assert!(Role::SeniorPhotographer.is_allowed(&photo_review));
    assert!(!Role::Photographer.is_allowed(&photo_review));
    assert!(!Role::Retoucher.is_allowed(&photo_review));
}

#[test]
fn test_role_names_round_trip() {
    for role in Role::ALL {
        assert_eq!(Role::from_str(role.as_str()), Some(*role));
    }
    assert_eq!(Role::from_str("farmer"), None);
}
