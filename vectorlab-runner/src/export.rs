//! CSV artifacts: order records, trades, and per-wallet equity.

use anyhow::Context;
use std::path::Path;
use vectorlab_core::domain::order::OrderSide;
use vectorlab_core::domain::records::OrderRecord;

use crate::trades::{TradeRecord, TradeStatus};

fn side_label(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
        OrderSide::None => "none",
    }
}

/// Write order records as one CSV row per fill.
pub fn write_order_records(path: &Path, records: &[OrderRecord]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(["id", "col", "row", "size", "price", "fees", "side"])?;
    for record in records {
        writer.write_record([
            record.id.to_string(),
            record.col.to_string(),
            record.row.to_string(),
            record.size.to_string(),
            record.price.to_string(),
            record.fees.to_string(),
            side_label(record.side).to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write extracted trades as one CSV row per round trip.
pub fn write_trades(path: &Path, trades: &[TradeRecord]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record([
        "col",
        "direction",
        "size",
        "entry_row",
        "avg_entry_price",
        "exit_row",
        "avg_exit_price",
        "pnl",
        "return_pct",
        "duration",
        "status",
    ])?;
    for trade in trades {
        writer.write_record([
            trade.col.to_string(),
            format!("{:?}", trade.direction).to_lowercase(),
            trade.size.to_string(),
            trade.entry_row.to_string(),
            trade.avg_entry_price.to_string(),
            trade.exit_row.to_string(),
            trade.avg_exit_price.to_string(),
            trade.pnl.to_string(),
            trade.return_pct.to_string(),
            trade.duration.to_string(),
            match trade.status {
                TradeStatus::Open => "open".to_string(),
                TradeStatus::Closed => "closed".to_string(),
            },
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a `T×W` row-major value grid, one column per wallet.
pub fn write_equity(path: &Path, value: &[f64], n_wallets: usize) -> anyhow::Result<()> {
    anyhow::ensure!(n_wallets > 0, "equity export needs at least one wallet");
    anyhow::ensure!(
        value.len() % n_wallets == 0,
        "value length {} is not a multiple of wallet count {n_wallets}",
        value.len()
    );
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut header = vec!["row".to_string()];
    header.extend((0..n_wallets).map(|w| format!("wallet_{w}")));
    writer.write_record(&header)?;
    for (row, chunk) in value.chunks(n_wallets).enumerate() {
        let mut fields = vec![row.to_string()];
        fields.extend(chunk.iter().map(|v| v.to_string()));
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, row: usize) -> OrderRecord {
        OrderRecord {
            id,
            col: 0,
            row,
            size: 1.5,
            price: 10.0,
            fees: 0.01,
            side: OrderSide::Buy,
        }
    }

    #[test]
    fn order_records_round_trip_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.csv");
        write_order_records(&path, &[record(0, 0), record(1, 3)]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "id,col,row,size,price,fees,side");
        assert_eq!(lines.next().unwrap(), "0,0,0,1.5,10,0.01,buy");
        assert_eq!(lines.next().unwrap(), "1,0,3,1.5,10,0.01,buy");
    }

    #[test]
    fn equity_grid_has_one_column_per_wallet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("equity.csv");
        write_equity(&path, &[100.0, 50.0, 110.0, 55.0], 2).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "row,wallet_0,wallet_1");
        assert_eq!(lines[1], "0,100,50");
        assert_eq!(lines[2], "1,110,55");
    }

    #[test]
    fn equity_rejects_ragged_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("equity.csv");
        assert!(write_equity(&path, &[1.0, 2.0, 3.0], 2).is_err());
    }
}
