//! Button-callback payload grammar (§6, §9 Design Notes). Replaces ad-hoc
//! string splitting at the call site with one tagged variant and a single
//! parse error branch.

use crate::domain::errors::ContractViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Sl,
    Tp,
    Ts,
}

impl TriggerKind {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "SL" => Some(TriggerKind::Sl),
            "TP" => Some(TriggerKind::Tp),
            "TS" => Some(TriggerKind::Ts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callback {
    ConfirmSell { kind: TriggerKind, ticker: String },
    CancelSell { kind: TriggerKind, ticker: String },
    ExecuteBuy { ticker: String },
    CancelBuy { ticker: String },
    AdvisorExec { id: String },
    AdvisorDismiss { id: String },
}

/// Parses `data` from an inbound button callback. Grammar:
/// `CONFIRM_<SL|TP|TS>_<TICKER>`, `CANCEL_<SL|TP|TS>_<TICKER>`,
/// `EXECUTE_BUY_<TICKER>`, `CANCEL_BUY_<TICKER>`, `AI_EXEC_<ID>`,
/// `AI_DISMISS_<ID>`.
pub fn parse(payload: &str) -> Result<Callback, ContractViolation> {
    let malformed = || ContractViolation::BadCallback(payload.to_string());

    if let Some(rest) = payload.strip_prefix("AI_EXEC_") {
        return Ok(Callback::AdvisorExec { id: rest.to_string() });
    }
    if let Some(rest) = payload.strip_prefix("AI_DISMISS_") {
        return Ok(Callback::AdvisorDismiss { id: rest.to_string() });
    }
    if let Some(rest) = payload.strip_prefix("EXECUTE_BUY_") {
        return Ok(Callback::ExecuteBuy {
            ticker: rest.to_string(),
        });
    }
    if let Some(rest) = payload.strip_prefix("CANCEL_BUY_") {
        return Ok(Callback::CancelBuy {
            ticker: rest.to_string(),
        });
    }
    if let Some(rest) = payload.strip_prefix("CONFIRM_") {
        let (kind_str, ticker) = rest.split_once('_').ok_or_else(malformed)?;
        let kind = TriggerKind::from_str(kind_str).ok_or_else(malformed)?;
        return Ok(Callback::ConfirmSell {
            kind,
            ticker: ticker.to_string(),
        });
    }
    if let Some(rest) = payload.strip_prefix("CANCEL_") {
        let (kind_str, ticker) = rest.split_once('_').ok_or_else(malformed)?;
        let kind = TriggerKind::from_str(kind_str).ok_or_else(malformed)?;
        return Ok(Callback::CancelSell {
            kind,
            ticker: ticker.to_string(),
        });
    }
    Err(malformed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_confirm_sell() {
        assert_eq!(
            parse("CONFIRM_SL_AAPL").unwrap(),
            Callback::ConfirmSell {
                kind: TriggerKind::Sl,
                ticker: "AAPL".to_string(),
            }
        );
    }

    #[test]
    fn parses_cancel_buy() {
        assert_eq!(
            parse("CANCEL_BUY_AAPL").unwrap(),
            Callback::CancelBuy {
                ticker: "AAPL".to_string(),
            }
        );
    }

    #[test]
    fn parses_advisor_payloads() {
        assert_eq!(
            parse("AI_EXEC_abc123").unwrap(),
            Callback::AdvisorExec {
                id: "abc123".to_string()
            }
        );
        assert_eq!(
            parse("AI_DISMISS_abc123").unwrap(),
            Callback::AdvisorDismiss {
                id: "abc123".to_string()
            }
        );
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(parse("CONFIRM_XX_AAPL").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("not_a_payload").is_err());
    }
}
