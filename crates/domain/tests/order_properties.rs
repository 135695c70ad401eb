//! Property tests for order totals and line validation.

use domain::{Aggregate, Money, Order, OrderError, OrderLine, OrderStatus, UserId};
use proptest::prelude::*;

fn started() -> Order {
    let mut order = Order::default();
    order
        .handle(|o| o.start(common::AggregateId::new(), UserId::new()))
        .unwrap();
    order
}

fn valid_line() -> impl Strategy<Value = OrderLine> {
    ("[A-Z]{1,3}", 0i64..100_000, 1i64..1_000)
        .prop_map(|(sku, price, qty)| OrderLine::new(sku, Money::from_cents(price), qty))
}

proptest! {
    #[test]
    fn total_is_sum_of_subtotals(batches in prop::collection::vec(prop::collection::vec(valid_line(), 0..5), 1..5)) {
        let mut order = started();
        let mut expected = 0i64;

        for batch in batches {
            expected += batch.iter().map(|l| l.unit_price.cents() * l.quantity).sum::<i64>();
            order.handle(|o| o.add_lines(batch.clone())).unwrap();
        }

        prop_assert_eq!(order.total(), Money::from_cents(expected));
        let recomputed: i64 = order.lines().iter().map(|l| l.subtotal().cents()).sum();
        prop_assert_eq!(order.total().cents(), recomputed);
    }

    #[test]
    fn non_positive_quantity_is_always_rejected(
        good in prop::collection::vec(valid_line(), 0..4),
        qty in i64::MIN..=0,
    ) {
        let order = started();
        let mut lines = good;
        lines.push(OrderLine::new("BAD", Money::from_cents(100), qty));

        let result = order.add_lines(lines);
        let rejected = matches!(result, Err(OrderError::InvalidLine { ref product_id, .. }) if product_id == "BAD");
        prop_assert!(rejected);
    }

    #[test]
    fn negative_price_is_always_rejected(price in i64::MIN..0, qty in 1i64..1_000) {
        let order = started();
        let result = order.add_lines(vec![OrderLine::new("NEG", Money::from_cents(price), qty)]);
        let rejected = matches!(result, Err(OrderError::InvalidLine { .. }));
        prop_assert!(rejected);
    }

    #[test]
    fn placed_total_never_changes(lines in prop::collection::vec(valid_line(), 1..6), extra in valid_line()) {
        let mut order = started();
        order.handle(|o| o.add_lines(lines.clone())).unwrap();
        order.handle(|o| o.place()).unwrap();
        let total = order.total();

        prop_assert!(order.add_lines(vec![extra]).is_err());
        prop_assert_eq!(order.status(), OrderStatus::Placed);
        prop_assert_eq!(order.total(), total);
    }
}
