//! Status enums mirroring the SMALLINT lookup tables.
//!
//! Each variant's discriminant matches the id seeded into the corresponding
//! `*_statuses` table, so services bind `status.id()` and read rows back
//! with `from_id`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status id type matching SMALLINT columns in the database.
pub type StatusId = i16;

/// A status id read from the database that no enum variant matches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} id {id}")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub id: StatusId,
}

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// All variants in seed order.
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            /// Return the database status id.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Resolve a database status id.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some($name::$variant), )+
                    _ => None,
                }
            }

            /// Russian label as seeded into the lookup table.
            pub fn label(self) -> &'static str {
                match self {
                    $( $name::$variant => $label, )+
                }
            }
        }

        impl TryFrom<StatusId> for $name {
            type Error = UnknownStatus;

            fn try_from(id: StatusId) -> Result<Self, Self::Error> {
                $name::from_id(id).ok_or(UnknownStatus {
                    kind: stringify!($name),
                    id,
                })
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

define_status_enum! {
    /// Where a product physically is.
    ProductMoveStatus {
        Ordered = 1 => "Заказан",
        Assembled = 2 => "Собран",
        Received = 3 => "Принят",
        Shipped = 4 => "Отправлен",
        Defective = 25 => "Брак",
    }
}

define_status_enum! {
    /// Photography request lifecycle.
    STRequestStatus {
        Draft = 1 => "Черновик",
        Created = 2 => "Создана",
        Shooting = 3 => "На съёмке",
        Shot = 4 => "Отснята",
        Checked = 5 => "Проверена",
        Cancelled = 6 => "Отменена",
    }
}

define_status_enum! {
    /// Photographer's verdict on a request line.
    PhotoStatus {
        Shot = 1 => "Отснято",
        NotShot = 2 => "Не отснято",
        Defective = 3 => "Брак",
    }
}

define_status_enum! {
    /// Senior photographer's verdict on a shot line.
    SeniorPhotoStatus {
        Approved = 1 => "Принято",
        Reshoot = 2 => "На пересъёмку",
    }
}

define_status_enum! {
    /// Retouch request lifecycle.
    RetouchRequestStatus {
        Created = 1 => "Создана",
        InProgress = 2 => "В работе",
        OnReview = 3 => "На проверке",
        Completed = 4 => "Завершена",
        Cancelled = 5 => "Отменена",
    }
}

define_status_enum! {
    /// Retoucher's verdict on a line.
    RetouchStatus {
        Done = 1 => "Готово",
        Unusable = 2 => "Непригодно",
    }
}

define_status_enum! {
    /// Senior retoucher's verdict on a retouched line.
    SeniorRetouchStatus {
        Approved = 1 => "Принято",
        Rework = 2 => "На доработку",
    }
}

define_status_enum! {
    /// Order assembly lifecycle.
    OrderStatus {
        Created = 1 => "Создан",
        Assembling = 2 => "Собирается",
        Assembled = 3 => "Собран",
        Accepting = 4 => "Принимается",
        Accepted = 5 => "Принят",
        Cancelled = 6 => "Отменён",
    }
}

define_status_enum! {
    /// Shipping invoice lifecycle.
    InvoiceStatus {
        Draft = 1 => "Черновик",
        Sent = 2 => "Отправлена",
    }
}

define_status_enum! {
    /// Render suitability check.
    RenderStatus {
        Checking = 1 => "На проверке",
        Suitable = 2 => "Подходит",
        Unsuitable = 3 => "Не подходит",
    }
}

define_status_enum! {
    /// Upload to the external moderation system.
    ModerationUploadStatus {
        Uploading = 1 => "Загружается",
        Uploaded = 2 => "Загружено",
        Rejected = 3 => "Отклонено",
    }
}

define_status_enum! {
    /// Kind of row in the product history log.
    OperationType {
        Ordered = 1 => "Заказ",
        Assembled = 2 => "Сборка",
        Received = 3 => "Приёмка",
        Shipped = 4 => "Отправка",
        AddedToRequest = 5 => "Добавлен в заявку",
        RemovedFromRequest = 6 => "Удалён из заявки",
        Photographed = 7 => "Съёмка",
        Retouched = 8 => "Ретушь",
        RenderChecked = 9 => "Проверка рендера",
        ModerationUploaded = 10 => "Загрузка на модерацию",
        Defective = 25 => "Брак",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defective_matches_seed_id() {
        assert_eq!(ProductMoveStatus::Defective.id(), 25);
        assert_eq!(OperationType::Defective.id(), 25);
    }

    #[test]
    fn from_id_round_trips_every_variant() {
        for status in STRequestStatus::ALL {
            assert_eq!(STRequestStatus::from_id(status.id()), Some(*status));
        }
        for status in OrderStatus::ALL {
            assert_eq!(OrderStatus::from_id(status.id()), Some(*status));
        }
    }

    #[test]
    fn unknown_id_is_none() {
        assert_eq!(ProductMoveStatus::from_id(5), None);
        assert_eq!(RenderStatus::from_id(0), None);
    }

    #[test]
    fn try_from_reports_kind() {
        let err = OrderStatus::try_from(9).unwrap_err();
        assert_eq!(err.kind, "OrderStatus");
        assert_eq!(err.id, 9);
        assert_eq!(InvoiceStatus::try_from(2), Ok(InvoiceStatus::Sent));
    }

    #[test]
    fn status_into_status_id() {
        let id: StatusId = RetouchRequestStatus::OnReview.into();
        assert_eq!(id, 3);
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&PhotoStatus::NotShot).unwrap();
        assert_eq!(json, "\"not_shot\"");
        let parsed: SeniorRetouchStatus = serde_json::from_str("\"rework\"").unwrap();
        assert_eq!(parsed, SeniorRetouchStatus::Rework);
    }
}
