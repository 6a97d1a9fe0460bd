//! Core domain layer. No external I/O dependencies.
//!
//! Entities and business rules live here. Dependencies flow inward.

/// Declares a string-backed enum with `as_str`, `Display` and `FromStr`.
/// The string form is what gets stored in the database and sent over the wire.
macro_rules! str_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::domain::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::domain::DomainError::Validation(format!(
                        "invalid {}: '{}' (expected one of: {})",
                        stringify!($name),
                        other,
                        [$($text),+].join(", ")
                    ))),
                }
            }
        }
    };
}

pub mod credit;
pub mod errors;
pub mod money;
pub mod oauth;
pub mod operation;

pub use credit::{
    CreditChange, CreditPrice, CreditTransaction, MembershipOrder, MembershipPrice,
    MembershipType, PaymentStatus, RechargeOrder, TransactionType, UserAccount, UserRole,
    generate_order_no,
};
pub use errors::DomainError;
pub use money::{Cents, format_cents, parse_cents};
pub use oauth::{
    OAuthAccount, OAuthCredentials, OAuthUsageLog, PlatformConfig, PlatformRequirements,
    UsageStatus,
};
pub use operation::{
    Activity, ActivityParticipation, ActivityStatus, ActivityType, Coupon, CouponStatus,
    CouponType, DiscountType, OperationStatistics, ReferralRecord, ReferralStatus,
    ReferralTrigger, Reward, UserCoupon,
};
