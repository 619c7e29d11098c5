// src/valuation.rs
//
// Pure portfolio math. No I/O in here: callers fetch quotes first, then run
// a valuation pass, so everything is unit-testable without a network or a
// database. Side effects of a disposal (quantity reduction, event append)
// are applied by the store from the plan returned here.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{DisposalEvent, Holding, PriceQuote};

#[derive(Debug, Serialize)]
pub struct PositionValue {
    pub symbol: String,
    pub lot_id: Uuid,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub current_price: Decimal,
    /// When the price was observed. A quote served from cache after a
    /// provider failure can be old; the client decides whether to warn.
    pub price_as_of: DateTime<Utc>,
    pub market_value: Decimal,
    pub unrealized_gain: Decimal,
}

#[derive(Debug, Serialize)]
pub struct PortfolioValuation {
    pub total_market_value: Decimal,
    pub total_unrealized_gain: Decimal,
    pub positions: Vec<PositionValue>,
}

/// A validated disposal, not yet applied. `remaining_quantity` of zero means
/// the lot is deleted when the plan is applied.
#[derive(Debug)]
pub struct DisposalPlan {
    pub event: DisposalEvent,
    pub remaining_quantity: Decimal,
}

/// Values every lot against the quote map. Fails with `MissingQuote` if any
/// held symbol has no quote; no partial total is ever returned.
pub fn compute_portfolio_value(
    holdings: &[Holding],
    quotes: &HashMap<String, PriceQuote>,
) -> Result<PortfolioValuation, AppError> {
    let mut positions = Vec::with_capacity(holdings.len());
    let mut total_market_value = Decimal::ZERO;
    let mut total_unrealized_gain = Decimal::ZERO;

    for holding in holdings {
        let quote = quotes.get(&holding.symbol).ok_or(AppError::MissingQuote {
            symbol: holding.symbol.clone(),
        })?;
        let market_value = quote.price * holding.quantity;
        let unrealized_gain = (quote.price - holding.cost_basis) * holding.quantity;
        total_market_value += market_value;
        total_unrealized_gain += unrealized_gain;
        positions.push(PositionValue {
            symbol: holding.symbol.clone(),
            lot_id: holding.lot_id,
            quantity: holding.quantity,
            cost_basis: holding.cost_basis,
            current_price: quote.price,
            price_as_of: quote.as_of,
            market_value,
            unrealized_gain,
        });
    }

    Ok(PortfolioValuation {
        total_market_value,
        total_unrealized_gain,
        positions,
    })
}

/// Validates a disposal against the lot and produces the immutable event.
/// Rejects non-positive quantities and anything above the held amount.
pub fn plan_disposal(
    holding: &Holding,
    quantity: Decimal,
    disposal_price: Decimal,
    disposed_at: DateTime<Utc>,
) -> Result<DisposalPlan, AppError> {
    if quantity <= Decimal::ZERO || quantity > holding.quantity {
        return Err(AppError::InsufficientQuantity {
            requested: quantity.to_string(),
            held: holding.quantity.to_string(),
        });
    }

    let realized_gain = (disposal_price - holding.cost_basis) * quantity;
    Ok(DisposalPlan {
        event: DisposalEvent {
            event_id: Uuid::new_v4(),
            user_id: holding.user_id.clone(),
            symbol: holding.symbol.clone(),
            lot_id: holding.lot_id,
            quantity,
            cost_basis: holding.cost_basis,
            disposal_price,
            realized_gain,
            disposed_at,
        },
        remaining_quantity: holding.quantity - quantity,
    })
}

/// Order-independent sum of realized gains.
pub fn total_realized_gain(events: &[DisposalEvent]) -> Decimal {
    events.iter().map(|e| e.realized_gain).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn lot(symbol: &str, quantity: Decimal, cost_basis: Decimal) -> Holding {
        Holding {
            user_id: "u1".to_string(),
            symbol: symbol.to_string(),
            lot_id: Uuid::new_v4(),
            quantity,
            cost_basis,
            acquired_at: Utc::now(),
        }
    }

    fn quote(symbol: &str, price: Decimal) -> (String, PriceQuote) {
        (
            symbol.to_string(),
            PriceQuote {
                symbol: symbol.to_string(),
                price,
                as_of: Utc::now(),
            },
        )
    }

    #[test]
    fn unrealized_gain_for_single_lot() {
        // 10 AAPL @ 100 cost, quoted at 150 -> gain 500
        let holdings = vec![lot("AAPL", dec!(10), dec!(100))];
        let quotes: HashMap<_, _> = [quote("AAPL", dec!(150))].into_iter().collect();

        let valuation = compute_portfolio_value(&holdings, &quotes).unwrap();
        assert_eq!(valuation.total_market_value, dec!(1500));
        assert_eq!(valuation.total_unrealized_gain, dec!(500));
        assert_eq!(valuation.positions[0].unrealized_gain, dec!(500));
    }

    #[test]
    fn unrealized_gain_is_zero_at_cost() {
        let holdings = vec![lot("MSFT", dec!(7), dec!(330.25))];
        let quotes: HashMap<_, _> = [quote("MSFT", dec!(330.25))].into_iter().collect();

        let valuation = compute_portfolio_value(&holdings, &quotes).unwrap();
        assert_eq!(valuation.total_unrealized_gain, Decimal::ZERO);
    }

    #[test]
    fn missing_quote_fails_the_whole_valuation() {
        let holdings = vec![
            lot("AAPL", dec!(10), dec!(100)),
            lot("GOOGL", dec!(2), dec!(120)),
        ];
        let quotes: HashMap<_, _> = [quote("AAPL", dec!(150))].into_iter().collect();

        let err = compute_portfolio_value(&holdings, &quotes).unwrap_err();
        match err {
            AppError::MissingQuote { symbol } => assert_eq!(symbol, "GOOGL"),
            other => panic!("expected MissingQuote, got {:?}", other),
        }
    }

    #[test]
    fn quote_timestamp_is_visible_per_position() {
        // An old cached quote must be distinguishable from a live one in the
        // valuation output.
        let holdings = vec![lot("AAPL", dec!(10), dec!(100))];
        let as_of = Utc::now() - chrono::Duration::days(3);
        let quotes: HashMap<_, _> = [(
            "AAPL".to_string(),
            PriceQuote {
                symbol: "AAPL".to_string(),
                price: dec!(150),
                as_of,
            },
        )]
        .into_iter()
        .collect();

        let valuation = compute_portfolio_value(&holdings, &quotes).unwrap();
        assert_eq!(valuation.positions[0].price_as_of, as_of);
    }

    #[test]
    fn aggregates_across_lots_of_the_same_symbol() {
        let holdings = vec![
            lot("AAPL", dec!(10), dec!(100)),
            lot("AAPL", dec!(5), dec!(140)),
        ];
        let quotes: HashMap<_, _> = [quote("AAPL", dec!(150))].into_iter().collect();

        let valuation = compute_portfolio_value(&holdings, &quotes).unwrap();
        assert_eq!(valuation.total_market_value, dec!(2250));
        assert_eq!(valuation.total_unrealized_gain, dec!(550));
    }

    #[test]
    fn partial_disposal_realizes_gain_and_leaves_remainder() {
        // dispose 4 of 10 AAPL (cost 100) at 160 -> gain 240, 6 left
        let holding = lot("AAPL", dec!(10), dec!(100));
        let plan = plan_disposal(&holding, dec!(4), dec!(160), Utc::now()).unwrap();
        assert_eq!(plan.event.realized_gain, dec!(240));
        assert_eq!(plan.remaining_quantity, dec!(6));
    }

    #[test]
    fn full_disposal_leaves_zero_remainder() {
        let holding = lot("AAPL", dec!(10), dec!(100));
        let plan = plan_disposal(&holding, dec!(10), dec!(160), Utc::now()).unwrap();
        assert_eq!(plan.event.realized_gain, dec!(600));
        assert_eq!(plan.remaining_quantity, Decimal::ZERO);
    }

    #[test]
    fn over_disposal_is_rejected_and_changes_nothing() {
        let holding = lot("AAPL", dec!(6), dec!(100));
        let err = plan_disposal(&holding, dec!(7), dec!(160), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::InsufficientQuantity { .. }));
        // planning never mutates the lot
        assert_eq!(holding.quantity, dec!(6));
    }

    #[test]
    fn non_positive_disposal_is_rejected() {
        let holding = lot("AAPL", dec!(6), dec!(100));
        assert!(plan_disposal(&holding, dec!(0), dec!(160), Utc::now()).is_err());
        assert!(plan_disposal(&holding, dec!(-1), dec!(160), Utc::now()).is_err());
    }

    #[test]
    fn realized_total_is_order_independent() {
        let holding = lot("AAPL", dec!(100), dec!(100));
        let mut events = vec![
            plan_disposal(&holding, dec!(4), dec!(160), Utc::now())
                .unwrap()
                .event,
            plan_disposal(&holding, dec!(10), dec!(90), Utc::now())
                .unwrap()
                .event,
            plan_disposal(&holding, dec!(1), dec!(250.50), Utc::now())
                .unwrap()
                .event,
        ];
        let forward = total_realized_gain(&events);
        events.reverse();
        assert_eq!(total_realized_gain(&events), forward);
        assert_eq!(forward, dec!(240) - dec!(100) + dec!(150.50));
    }

    #[test]
    fn disposal_at_a_loss_yields_negative_gain() {
        let holding = lot("ABNB", dec!(3), dec!(150));
        let plan = plan_disposal(&holding, dec!(3), dec!(120), Utc::now()).unwrap();
        assert_eq!(plan.event.realized_gain, dec!(-90));
    }
}
