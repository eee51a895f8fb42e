//! Operator command grammar (§4.8): plain text, whitespace-delimited,
//! first token `/verb`. Parsing never panics and never fails fatally — an
//! unrecognized verb or a bad argument yields `ContractViolation`.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::errors::ContractViolation;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping,
    Status,
    List,
    Price { ticker: String },
    Market,
    Search { query: String },
    Scan { sector: String },
    Portfolio,
    Buy {
        ticker: String,
        qty: Decimal,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
    },
    Sell { ticker: String },
    Update {
        ticker: String,
        sl: Decimal,
        tp: Decimal,
        ts: Option<Decimal>,
    },
    Refresh,
    Analyze { ticker: Option<String> },
    Stop,
    Start,
    Help,
}

fn parse_decimal(verb: &str, arg: &str) -> Result<Decimal, ContractViolation> {
    Decimal::from_str(arg).map_err(|_| ContractViolation::BadArgument {
        verb: verb.to_string(),
        arg: arg.to_string(),
    })
}

/// Parses one line of operator input into a [`Command`]. A batch of
/// semicolon-separated commands (advisor multi-step) is split by the
/// caller before reaching this function — see `command_router::split_batch`.
pub fn parse(line: &str) -> Result<Command, ContractViolation> {
    let line = line.trim();
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or("").to_lowercase();
    let args: Vec<&str> = parts.collect();

    match verb.as_str() {
        "/ping" => Ok(Command::Ping),
        "/status" => Ok(Command::Status),
        "/list" => Ok(Command::List),
        "/price" => {
            let ticker = args.first().ok_or_else(|| ContractViolation::BadArgument {
                verb: verb.clone(),
                arg: "<missing ticker>".to_string(),
            })?;
            Ok(Command::Price {
                ticker: ticker.to_uppercase(),
            })
        }
        "/market" => Ok(Command::Market),
        "/search" => {
            let query = args.join(" ");
            if query.is_empty() {
                return Err(ContractViolation::BadArgument {
                    verb,
                    arg: "<missing query>".to_string(),
                });
            }
            Ok(Command::Search { query })
        }
        "/scan" => {
            let sector = args.first().ok_or_else(|| ContractViolation::BadArgument {
                verb: verb.clone(),
                arg: "<missing sector>".to_string(),
            })?;
            Ok(Command::Scan {
                sector: sector.to_lowercase(),
            })
        }
        "/portfolio" => Ok(Command::Portfolio),
        "/buy" => {
            if args.len() < 2 {
                return Err(ContractViolation::BadArgument {
                    verb,
                    arg: "usage: /buy TICKER QTY [SL] [TP]".to_string(),
                });
            }
            let ticker = args[0].to_uppercase();
            let qty = parse_decimal("/buy", args[1])?;
            let sl = args.get(2).map(|a| parse_decimal("/buy", a)).transpose()?;
            let tp = args.get(3).map(|a| parse_decimal("/buy", a)).transpose()?;
            Ok(Command::Buy { ticker, qty, sl, tp })
        }
        "/sell" => {
            let ticker = args.first().ok_or_else(|| ContractViolation::BadArgument {
                verb: verb.clone(),
                arg: "<missing ticker>".to_string(),
            })?;
            Ok(Command::Sell {
                ticker: ticker.to_uppercase(),
            })
        }
        "/update" => {
            if args.len() < 3 {
                return Err(ContractViolation::BadArgument {
                    verb,
                    arg: "usage: /update TICKER SL TP [TS]".to_string(),
                });
            }
            let ticker = args[0].to_uppercase();
            let sl = parse_decimal("/update", args[1])?;
            let tp = parse_decimal("/update", args[2])?;
            let ts = args.get(3).map(|a| parse_decimal("/update", a)).transpose()?;
            Ok(Command::Update { ticker, sl, tp, ts })
        }
        "/refresh" => {
            if !args.is_empty() {
                return Err(ContractViolation::BadArgument {
                    verb,
                    arg: "/refresh takes no arguments".to_string(),
                });
            }
            Ok(Command::Refresh)
        }
        "/analyze" => Ok(Command::Analyze {
            ticker: args.first().map(|s| s.to_uppercase()),
        }),
        "/stop" => Ok(Command::Stop),
        "/start" => Ok(Command::Start),
        "/help" => Ok(Command::Help),
        "" => Err(ContractViolation::UnknownVerb("<empty>".to_string())),
        other => Err(ContractViolation::UnknownVerb(other.to_string())),
    }
}
