use common::OrderSide;
use proptest::prelude::*;
use risk::{OrderSizer, SizingConfig};

proptest! {
    /// Sized quantities never exceed the request, are whole lots and never
    /// panic on extreme inputs.
    #[test]
    fn sized_quantity_is_whole_lots_and_never_more_than_requested(
        quantity in 0.0001f64..1000.0,
        held in 0.0f64..1000.0,
        lot_exp in 0u32..6,
        price in 0.0001f64..1_000_000.0,
        sell in any::<bool>(),
    ) {
        let lot_step = 10f64.powi(-(lot_exp as i32));
        let sizer = OrderSizer::new(SizingConfig {
            quantity,
            lot_step,
            min_quantity: 0.0,
            max_notional: None,
        });
        let side = if sell { OrderSide::Sell } else { OrderSide::Buy };
        let requested = if sell { held } else { quantity };

        if let Ok(q) = sizer.size(side, held, price) {
            prop_assert!(q > 0.0);
            prop_assert!(q <= requested + lot_step * 1e-6);
            let lots = q / lot_step;
            prop_assert!((lots - lots.round()).abs() < 1e-6, "{q} is not a multiple of {lot_step}");
        }
    }
}
