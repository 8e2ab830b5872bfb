pub mod payment;

pub use payment::{paid_router, payment_middleware, VOUCHER_HEADER};
