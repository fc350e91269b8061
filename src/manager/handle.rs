//! Channel endpoints for talking to the manager task.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use crate::exchange::Tick;
use crate::trade::Trade;

pub enum ManagerCommand {
    /// Hand a newly created trade over; acked with whether it was accepted.
    AddTrade {
        trade: Box<Trade>,
        ack: oneshot::Sender<bool>,
    },
    Tick(Tick),
    /// Subscribe market data for symbols a strategy wants priced.
    Track(Vec<String>),
    SetStrategyEnabled {
        strategy_id: String,
        enabled: bool,
    },
    /// Save a final snapshot and stop.
    Shutdown,
}

/// Cloneable sender side plus the published trade snapshot.
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::Sender<ManagerCommand>,
    trades: watch::Receiver<Arc<Vec<Trade>>>,
}

impl ManagerHandle {
    pub fn new(
        commands: mpsc::Sender<ManagerCommand>,
        trades: watch::Receiver<Arc<Vec<Trade>>>,
    ) -> Self {
        Self { commands, trades }
    }

    async fn send(&self, command: ManagerCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("trade manager is not running"))
    }

    /// Returns false when the manager dropped the trade as a duplicate.
    pub async fn add_trade(&self, trade: Trade) -> Result<bool> {
        let (ack, accepted) = oneshot::channel();
        self.send(ManagerCommand::AddTrade {
            trade: Box::new(trade),
            ack,
        })
        .await?;
        accepted
            .await
            .map_err(|_| anyhow!("trade manager stopped before acknowledging"))
    }

    pub async fn track(&self, symbols: Vec<String>) -> Result<()> {
        self.send(ManagerCommand::Track(symbols)).await
    }

    pub async fn tick(&self, tick: Tick) -> Result<()> {
        self.send(ManagerCommand::Tick(tick)).await
    }

    pub async fn set_strategy_enabled(&self, strategy_id: &str, enabled: bool) -> Result<()> {
        self.send(ManagerCommand::SetStrategyEnabled {
            strategy_id: strategy_id.to_string(),
            enabled,
        })
        .await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(ManagerCommand::Shutdown).await
    }

    /// Latest published trades of the account.
    pub fn trades(&self) -> Arc<Vec<Trade>> {
        Arc::clone(&self.trades.borrow())
    }
}
