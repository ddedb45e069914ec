//! Shared transaction types: steps, intents, envelopes and outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use uuid::Uuid;

/// Builder error code reserved for a missing trustline
pub const TRUSTLINE_MISSING_CODE: i64 = 13;

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Idle,
    Building,
    RecoveringPrecondition,
    WaitingSignature,
    Broadcasting,
    Succeeded,
    Failed,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Idle => "idle",
            Step::Building => "building",
            Step::RecoveringPrecondition => "recovering_precondition",
            Step::WaitingSignature => "waiting_signature",
            Step::Broadcasting => "broadcasting",
            Step::Succeeded => "succeeded",
            Step::Failed => "failed",
        }
    }

    /// Whether a new run may start from this step
    pub fn accepts_execute(&self) -> bool {
        matches!(self, Step::Idle | Step::Succeeded | Step::Failed)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque transaction payload, forwarded untouched between collaborators
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope(String);

impl Envelope {
    pub fn new(xdr: impl Into<String>) -> Self {
        Self(xdr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Envelopes can be large; log only their size
impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Envelope({} bytes)", self.0.len())
    }
}

/// A non-native asset as identified on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    pub code: String,
    pub issuer: String,
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issuer.is_empty() {
            f.write_str(&self.code)
        } else {
            write!(f, "{}:{}", self.code, self.issuer)
        }
    }
}

/// Ready-made trustline transaction supplied by the builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub envelope: Envelope,
    pub asset: AssetRef,
    pub description: String,
}

/// Structured, recoverable build failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreconditionError {
    pub code: i64,
    pub message: String,
    pub recovery: RecoveryPlan,
}

impl PreconditionError {
    pub fn is_missing_trustline(&self) -> bool {
        self.code == TRUSTLINE_MISSING_CODE
    }
}

impl fmt::Display for PreconditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {} ({}): {}", self.code, self.recovery.asset, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Swap,
    AddLiquidity,
    VaultDeposit,
    VaultWithdraw,
    BridgeWithdraw,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Swap => "swap",
            OperationKind::AddLiquidity => "add_liquidity",
            OperationKind::VaultDeposit => "vault_deposit",
            OperationKind::VaultWithdraw => "vault_withdraw",
            OperationKind::BridgeWithdraw => "bridge_withdraw",
        }
    }

    /// Builder route for this operation
    pub fn builder_path(&self) -> &'static str {
        match self {
            OperationKind::Swap => "swap/build",
            OperationKind::AddLiquidity => "liquidity/add",
            OperationKind::VaultDeposit => "vault/deposit",
            OperationKind::VaultWithdraw => "vault/withdraw",
            OperationKind::BridgeWithdraw => "bridge/withdraw",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation-specific parameters. Amounts are integer strings in the
/// asset's smallest unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Swap {
        asset_in: String,
        asset_out: String,
        amount_in: String,
        #[serde(default)]
        amount_out_min: Option<String>,
    },
    AddLiquidity {
        asset_a: String,
        asset_b: String,
        amount_a: String,
        amount_b: String,
    },
    VaultDeposit {
        vault: String,
        amount: String,
    },
    VaultWithdraw {
        vault: String,
        shares: String,
    },
    BridgeWithdraw {
        asset: String,
        amount: String,
        destination: String,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Swap { .. } => OperationKind::Swap,
            Operation::AddLiquidity { .. } => OperationKind::AddLiquidity,
            Operation::VaultDeposit { .. } => OperationKind::VaultDeposit,
            Operation::VaultWithdraw { .. } => OperationKind::VaultWithdraw,
            Operation::BridgeWithdraw { .. } => OperationKind::BridgeWithdraw,
        }
    }
}

/// What the user asked to do. Never mutated by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Acting account (public key)
    pub account: String,
    #[serde(flatten)]
    pub operation: Operation,
    #[serde(default)]
    pub slippage_bps: Option<u32>,
}

impl Intent {
    pub fn new(account: impl Into<String>, operation: Operation) -> Self {
        Self {
            account: account.into(),
            operation,
            slippage_bps: None,
        }
    }

    pub fn with_slippage_bps(mut self, bps: u32) -> Self {
        self.slippage_bps = Some(bps);
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    /// Map the intent onto the builder's request shape for its operation kind
    pub fn build_request(&self, default_slippage_bps: u32) -> BuildRequest {
        let mut body = Map::new();
        body.insert("operation".into(), json!(self.kind().as_str()));
        body.insert("account".into(), json!(self.account));
        body.insert(
            "slippageBps".into(),
            json!(self.slippage_bps.unwrap_or(default_slippage_bps)),
        );

        match &self.operation {
            Operation::Swap {
                asset_in,
                asset_out,
                amount_in,
                amount_out_min,
            } => {
                body.insert("assetIn".into(), json!(asset_in));
                body.insert("assetOut".into(), json!(asset_out));
                body.insert("amountIn".into(), json!(amount_in));
                if let Some(min) = amount_out_min {
                    body.insert("amountOutMin".into(), json!(min));
                }
            }
            Operation::AddLiquidity {
                asset_a,
                asset_b,
                amount_a,
                amount_b,
            } => {
                body.insert("assetA".into(), json!(asset_a));
                body.insert("assetB".into(), json!(asset_b));
                body.insert("amountA".into(), json!(amount_a));
                body.insert("amountB".into(), json!(amount_b));
            }
            Operation::VaultDeposit { vault, amount } => {
                body.insert("vault".into(), json!(vault));
                body.insert("amount".into(), json!(amount));
            }
            Operation::VaultWithdraw { vault, shares } => {
                body.insert("vault".into(), json!(vault));
                body.insert("shares".into(), json!(shares));
            }
            Operation::BridgeWithdraw {
                asset,
                amount,
                destination,
            } => {
                body.insert("asset".into(), json!(asset));
                body.insert("amount".into(), json!(amount));
                body.insert("destination".into(), json!(destination));
            }
        }

        BuildRequest {
            path: self.kind().builder_path(),
            body: Value::Object(body),
        }
    }
}

/// Wire request for the builder
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    pub path: &'static str,
    pub body: Value,
}

/// Terminal success of an orchestrator run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub kind: OperationKind,
    pub hash: String,
    pub success: bool,
    /// Trustline created along the way, if recovery ran
    pub recovered_trustline: Option<AssetRef>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_allowed_only_from_rest_states() {
        assert!(Step::Idle.accepts_execute());
        assert!(Step::Succeeded.accepts_execute());
        assert!(Step::Failed.accepts_execute());
        assert!(!Step::Building.accepts_execute());
        assert!(!Step::RecoveringPrecondition.accepts_execute());
        assert!(!Step::WaitingSignature.accepts_execute());
        assert!(!Step::Broadcasting.accepts_execute());
    }

    #[test]
    fn test_intent_deserializes_from_flat_json() {
        let intent: Intent = serde_json::from_str(
            r#"{
                "account": "GABC",
                "kind": "vault_deposit",
                "vault": "CVAULT",
                "amount": "1000000"
            }"#,
        )
        .unwrap();

        assert_eq!(intent.kind(), OperationKind::VaultDeposit);
        assert_eq!(intent.account, "GABC");
        assert_eq!(intent.slippage_bps, None);
    }

    #[test]
    fn test_swap_build_request() {
        let intent = Intent::new(
            "GABC",
            Operation::Swap {
                asset_in: "XLM".into(),
                asset_out: "USDC:GISSUER".into(),
                amount_in: "5000000".into(),
                amount_out_min: None,
            },
        )
        .with_slippage_bps(100);

        let req = intent.build_request(50);
        assert_eq!(req.path, "swap/build");
        assert_eq!(req.body["operation"], "swap");
        assert_eq!(req.body["slippageBps"], 100);
        assert_eq!(req.body["assetOut"], "USDC:GISSUER");
        assert!(req.body.get("amountOutMin").is_none());
    }

    #[test]
    fn test_default_slippage_applies() {
        let intent = Intent::new(
            "GABC",
            Operation::BridgeWithdraw {
                asset: "USDC".into(),
                amount: "10".into(),
                destination: "0xdead".into(),
            },
        );

        let req = intent.build_request(50);
        assert_eq!(req.path, "bridge/withdraw");
        assert_eq!(req.body["slippageBps"], 50);
        assert_eq!(req.body["destination"], "0xdead");
    }

    #[test]
    fn test_envelope_debug_hides_contents() {
        let env = Envelope::new("AAAAAgAAAAB");
        assert_eq!(format!("{:?}", env), "Envelope(11 bytes)");
    }

    #[test]
    fn test_asset_display() {
        let native = AssetRef {
            code: "XLM".into(),
            issuer: String::new(),
        };
        let usdc = AssetRef {
            code: "USDC".into(),
            issuer: "GA5Z".into(),
        };
        assert_eq!(native.to_string(), "XLM");
        assert_eq!(usdc.to_string(), "USDC:GA5Z");
    }
}
