//! Kite Connect v3 REST client.

use crate::config::BrokerConfig;
use crate::exchange::error::{GatewayError, MODIFICATION_LIMIT_MESSAGE};
use crate::exchange::traits::{segment, OrderGateway, QuoteSource};
use crate::exchange::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

const KITE_VERSION: &str = "3";
const IST_OFFSET_SECS: i32 = 330 * 60;

/// Kite Connect REST client for one account session.
pub struct KiteClient {
    http: Client,
    base_url: String,
    api_key: String,
    access_token: String,
    /// Instruments keyed by "EXCHANGE:SYMBOL", loaded lazily per exchange
    instruments: RwLock<HashMap<String, Instrument>>,
    loaded_exchanges: RwLock<HashSet<String>>,
}

/// `{"status": "success", "data": ...}` or `{"status": "error", "message": ...}`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderIdData {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct KiteOrder {
    order_id: String,
    #[serde(default)]
    parent_order_id: Option<String>,
    status: String,
    tradingsymbol: String,
    exchange: String,
    transaction_type: String,
    order_type: String,
    product: String,
    #[serde(default)]
    price: Decimal,
    #[serde(default)]
    trigger_price: Decimal,
    quantity: u32,
    #[serde(default)]
    filled_quantity: u32,
    #[serde(default)]
    pending_quantity: u32,
    #[serde(default)]
    average_price: Decimal,
    #[serde(default)]
    order_timestamp: Option<String>,
    #[serde(default)]
    exchange_update_timestamp: Option<String>,
    #[serde(default)]
    status_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct KiteOhlc {
    #[serde(default)]
    open: Decimal,
    #[serde(default)]
    high: Decimal,
    #[serde(default)]
    low: Decimal,
    #[serde(default)]
    close: Decimal,
}

#[derive(Debug, Deserialize)]
struct KiteQuote {
    #[serde(default)]
    last_price: Decimal,
    #[serde(default)]
    last_quantity: u64,
    #[serde(default)]
    average_price: Decimal,
    #[serde(default)]
    volume: u64,
    #[serde(default)]
    buy_quantity: u64,
    #[serde(default)]
    sell_quantity: u64,
    #[serde(default)]
    ohlc: KiteOhlc,
    #[serde(default)]
    net_change: Decimal,
    #[serde(default)]
    oi: u64,
    #[serde(default)]
    lower_circuit_limit: Decimal,
    #[serde(default)]
    upper_circuit_limit: Decimal,
}

impl KiteClient {
    /// Create a client for an account session.
    pub fn new(config: &BrokerConfig, access_token: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            access_token: access_token.into(),
            instruments: RwLock::new(HashMap::new()),
            loaded_exchanges: RwLock::new(HashSet::new()),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("X-Kite-Version", KITE_VERSION)
            .header(
                "Authorization",
                format!("token {}:{}", self.api_key, self.access_token),
            )
    }

    /// Send a request and unwrap the Kite response envelope.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let envelope: Envelope<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => return Err(GatewayError::Decode(e.to_string())),
            Err(_) => return Err(GatewayError::from_status(status.as_u16(), body)),
        };

        if envelope.status != "success" {
            let message = envelope.message.unwrap_or_else(|| status.to_string());
            if message.contains(MODIFICATION_LIMIT_MESSAGE) {
                return Err(GatewayError::modification_limit(""));
            }
            if status.is_success() || (status.is_client_error() && status.as_u16() != 429) {
                return Err(GatewayError::Rejected(message));
            }
            return Err(GatewayError::from_status(status.as_u16(), message));
        }

        envelope
            .data
            .ok_or_else(|| GatewayError::Decode("missing data".to_string()))
    }

    fn order_params(request: &OrderRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("tradingsymbol", request.symbol.clone()),
            ("exchange", request.exchange.clone()),
            ("transaction_type", request.side.as_str().to_string()),
            ("order_type", request.order_type.as_str().to_string()),
            ("quantity", request.qty.to_string()),
            ("product", request.product_type.as_str().to_string()),
            ("validity", "DAY".to_string()),
        ];

        if request.order_type != OrderType::Market {
            params.push(("price", request.price.to_string()));
        }
        if request.order_type.is_stop() {
            params.push(("trigger_price", request.trigger_price.to_string()));
        }
        if let Some(tag) = &request.tag {
            params.push(("tag", tag.clone()));
        }
        params
    }

    fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
        let ist = FixedOffset::east_opt(IST_OFFSET_SECS)?;
        let naive = NaiveDateTime::parse_from_str(value?, "%Y-%m-%d %H:%M:%S").ok()?;
        ist.from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn to_order(raw: KiteOrder) -> Order {
        let side = if raw.transaction_type == "SELL" {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let order_type = match raw.order_type.as_str() {
            "MARKET" => OrderType::Market,
            "SL" => OrderType::StopLimit,
            "SL-M" => OrderType::StopMarket,
            _ => OrderType::Limit,
        };
        let product_type = match raw.product.as_str() {
            "NRML" => ProductType::Nrml,
            "CNC" => ProductType::Cnc,
            _ => ProductType::Mis,
        };

        Order {
            placed_at: Self::parse_timestamp(raw.order_timestamp.as_deref()),
            updated_at: Self::parse_timestamp(raw.exchange_update_timestamp.as_deref()),
            order_id: raw.order_id,
            symbol: raw.tradingsymbol,
            exchange: raw.exchange,
            product_type,
            order_type,
            side,
            price: raw.price,
            trigger_price: raw.trigger_price,
            qty: raw.quantity,
            status: OrderStatus::from_broker(&raw.status),
            filled_qty: raw.filled_quantity.min(raw.quantity),
            pending_qty: raw.pending_quantity,
            average_price: raw.average_price,
            message: raw.status_message,
            parent_order_id: raw.parent_order_id,
            modifications: 0,
            algo_cancelled: false,
        }
    }

    /// Download and cache the instrument dump of an exchange.
    #[instrument(skip(self))]
    async fn load_instruments(&self, exchange: &str) -> Result<(), GatewayError> {
        if self.loaded_exchanges.read().await.contains(exchange) {
            return Ok(());
        }

        let url = format!("{}/instruments/{}", self.base_url, exchange);
        let response = self.authorized(self.http.get(&url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::from_status(status.as_u16(), "instrument dump failed"));
        }
        let csv = response.text().await?;
        let parsed = parse_instruments_csv(&csv);
        debug!(exchange, count = parsed.len(), "Loaded instruments");

        let mut instruments = self.instruments.write().await;
        for instrument in parsed {
            instruments.insert(
                format!("{}:{}", instrument.exchange, instrument.symbol),
                instrument,
            );
        }
        self.loaded_exchanges.write().await.insert(exchange.to_string());
        Ok(())
    }
}

/// Parse the Kite instruments CSV dump.
///
/// Columns: instrument_token, exchange_token, tradingsymbol, name, last_price,
/// expiry, strike, tick_size, lot_size, instrument_type, segment, exchange.
fn parse_instruments_csv(csv: &str) -> Vec<Instrument> {
    csv.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split(',').collect();
            if cols.len() < 12 {
                return None;
            }
            Some(Instrument {
                symbol: cols[2].trim_matches('"').to_string(),
                exchange: cols[11].trim().to_string(),
                tick_size: cols[7].parse().unwrap_or(Decimal::ZERO),
                lot_size: cols[8].parse().unwrap_or(0),
            })
        })
        .collect()
}

#[async_trait]
impl OrderGateway for KiteClient {
    #[instrument(skip(self))]
    async fn place_order(&self, request: &OrderRequest) -> Result<String, GatewayError> {
        let url = format!("{}/orders/regular", self.base_url);
        debug!("Placing order: {:?}", request);
        let data: OrderIdData = self
            .send(self.http.post(&url).form(&Self::order_params(request)))
            .await?;
        Ok(data.order_id)
    }

    #[instrument(skip(self))]
    async fn modify_order(&self, order_id: &str, modify: &OrderModify) -> Result<(), GatewayError> {
        let url = format!(
            "{}/orders/regular/{}",
            self.base_url,
            urlencoding::encode(order_id)
        );
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(order_type) = modify.order_type {
            params.push(("order_type", order_type.as_str().to_string()));
        }
        if let Some(qty) = modify.qty {
            params.push(("quantity", qty.to_string()));
        }
        if let Some(price) = modify.price {
            params.push(("price", price.to_string()));
        }
        if let Some(trigger) = modify.trigger_price {
            params.push(("trigger_price", trigger.to_string()));
        }

        match self
            .send::<OrderIdData>(self.http.put(&url).form(&params))
            .await
        {
            Ok(_) => Ok(()),
            Err(GatewayError::ModificationLimitExceeded { .. }) => {
                Err(GatewayError::modification_limit(order_id))
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        let url = format!(
            "{}/orders/regular/{}",
            self.base_url,
            urlencoding::encode(order_id)
        );
        self.send::<OrderIdData>(self.http.delete(&url)).await?;
        Ok(())
    }

    #[instrument(skip(self, known), fields(known = known.len()))]
    async fn fetch_statuses(&self, known: &[String]) -> Result<OrderStatusUpdate, GatewayError> {
        let url = format!("{}/orders", self.base_url);
        let orders: Vec<KiteOrder> = self.send(self.http.get(&url)).await?;

        let known: HashSet<&str> = known.iter().map(String::as_str).collect();
        let mut update = OrderStatusUpdate::default();
        // the order book lists each modification; keep the latest entry per id
        let mut latest: HashMap<String, Order> = HashMap::new();
        for raw in orders {
            let order = Self::to_order(raw);
            latest.insert(order.order_id.clone(), order);
        }

        for (id, order) in latest {
            if known.contains(id.as_str()) {
                update.updated.push(order);
            } else if order
                .parent_order_id
                .as_deref()
                .is_some_and(|parent| known.contains(parent))
            {
                update.discovered.push(order);
            }
        }
        Ok(update)
    }
}

#[async_trait]
impl QuoteSource for KiteClient {
    #[instrument(skip(self))]
    async fn quote(&self, symbol: &str, is_derivative: bool) -> Result<Quote, GatewayError> {
        let key = format!("{}:{}", segment(is_derivative), symbol);
        let url = format!("{}/quote?i={}", self.base_url, urlencoding::encode(&key));
        let mut data: HashMap<String, KiteQuote> = self.send(self.http.get(&url)).await?;

        let raw = data
            .remove(&key)
            .ok_or_else(|| GatewayError::NotFound(key.clone()))?;

        Ok(Quote {
            symbol: symbol.to_string(),
            last_price: raw.last_price,
            last_qty: raw.last_quantity,
            average_price: raw.average_price,
            volume: raw.volume,
            buy_qty: raw.buy_quantity,
            sell_qty: raw.sell_quantity,
            ohlc: Ohlc {
                open: raw.ohlc.open,
                high: raw.ohlc.high,
                low: raw.ohlc.low,
                close: raw.ohlc.close,
            },
            change: raw.net_change,
            open_interest: raw.oi,
            circuit: CircuitLimits {
                lower: raw.lower_circuit_limit,
                upper: raw.upper_circuit_limit,
            },
        })
    }

    async fn instrument(&self, symbol: &str, is_derivative: bool) -> Result<Instrument, GatewayError> {
        let exchange = segment(is_derivative);
        self.load_instruments(exchange).await?;

        let key = format!("{exchange}:{symbol}");
        let instrument = self.instruments.read().await.get(&key).cloned();
        instrument.ok_or_else(|| {
            warn!(%key, "Unknown instrument");
            GatewayError::NotFound(key)
        })
    }
}
