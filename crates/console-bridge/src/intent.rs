use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compiler::CompileError;

/// Operations the console bridge knows how to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntentName {
    GetAccounts,
    GetBalance,
    GetBlockNumber,
    GetCoinbase,
    GetPeerCount,
    GetPeers,
    GetNodeInfo,
    IsMining,
    StartMiner,
    StopMiner,
    NewAccount,
    UnlockAccount,
    SendTransaction,
    GetTransaction,
    GetTransactionReceipt,
    GetContractAddress,
    DeploySmartContract,
    InvokeContractFunction,
}

impl IntentName {
    pub const ALL: [IntentName; 18] = [
        IntentName::GetAccounts,
        IntentName::GetBalance,
        IntentName::GetBlockNumber,
        IntentName::GetCoinbase,
        IntentName::GetPeerCount,
        IntentName::GetPeers,
        IntentName::GetNodeInfo,
        IntentName::IsMining,
        IntentName::StartMiner,
        IntentName::StopMiner,
        IntentName::NewAccount,
        IntentName::UnlockAccount,
        IntentName::SendTransaction,
        IntentName::GetTransaction,
        IntentName::GetTransactionReceipt,
        IntentName::GetContractAddress,
        IntentName::DeploySmartContract,
        IntentName::InvokeContractFunction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentName::GetAccounts => "getAccounts",
            IntentName::GetBalance => "getBalance",
            IntentName::GetBlockNumber => "getBlockNumber",
            IntentName::GetCoinbase => "getCoinbase",
            IntentName::GetPeerCount => "getPeerCount",
            IntentName::GetPeers => "getPeers",
            IntentName::GetNodeInfo => "getNodeInfo",
            IntentName::IsMining => "isMining",
            IntentName::StartMiner => "startMiner",
            IntentName::StopMiner => "stopMiner",
            IntentName::NewAccount => "newAccount",
            IntentName::UnlockAccount => "unlockAccount",
            IntentName::SendTransaction => "sendTransaction",
            IntentName::GetTransaction => "getTransaction",
            IntentName::GetTransactionReceipt => "getTransactionReceipt",
            IntentName::GetContractAddress => "getContractAddress",
            IntentName::DeploySmartContract => "deploySmartContract",
            IntentName::InvokeContractFunction => "invokeContractFunction",
        }
    }
}

impl fmt::Display for IntentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentName {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntentName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| CompileError::UnknownIntent(s.to_string()))
    }
}

/// Per-request switches. `call` selects a read-only contract call over a
/// signed transaction for `invokeContractFunction`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentOptions {
    #[serde(default)]
    pub call: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub name: IntentName,
    pub params: Vec<String>,
    pub options: IntentOptions,
}

impl Intent {
    pub fn new(name: IntentName, params: Vec<String>) -> Self {
        Self {
            name,
            params,
            options: IntentOptions::default(),
        }
    }

    pub fn parse(name: &str, params: Vec<String>) -> Result<Self, CompileError> {
        Ok(Self::new(name.parse()?, params))
    }

    pub fn with_options(mut self, options: IntentOptions) -> Self {
        self.options = options;
        self
    }

    /// True when running the intent broadcasts a transaction whose hash the
    /// console prints back.
    pub fn is_submission(&self) -> bool {
        match self.name {
            IntentName::SendTransaction | IntentName::DeploySmartContract => true,
            IntentName::InvokeContractFunction => !self.options.call,
            _ => false,
        }
    }
}

/// Flattens JSON request parameters into the positional string form the
/// compiler consumes. Strings pass through, everything else is serialized
/// compactly.
pub fn params_from_json(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .map(|value| match value {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect()
}
