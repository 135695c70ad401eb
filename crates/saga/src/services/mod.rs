//! Collaborator contracts and in-memory implementations.

pub mod inventory;
pub mod notification;
pub mod payment;
pub mod shipping;

pub use inventory::{InMemoryStockStore, ReservationOutcome, StockReservation, StockStore};
pub use notification::{
    InMemoryNotificationService, Notification, NotificationKind, NotificationService,
};
pub use payment::{
    ChargeOutcome, ChargeRequest, GatewayBehavior, InMemoryPaymentGateway, PaymentGateway,
};
pub use shipping::{InMemoryShippingService, ShipmentReceipt, ShippingService};
