//! Intent -> console command compilation.
//!
//! Every compiled command has the shape `<program> --exec <script> attach
//! [<target>]`. The execution bridge tokenizes it by splitting on the space
//! character, so a script must never contain a space: templates are written
//! without them, parameters containing one are rejected, and the contract
//! interface description has every whitespace character turned into a tab.
//! Tabs are not token separators.

use serde_json::Value;
use thiserror::Error;

use crate::intent::{Intent, IntentName, IntentOptions};

/// Decimal places between ether and wei.
pub const WEI_DECIMALS: usize = 18;

/// Global the console binds the contract instance to in a two-stage invocation.
const CONTRACT_HANDLE: &str = "instance";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("unknown intent: {0}")]
    UnknownIntent(String),
    #[error("missing parameter `{name}` at position {position}")]
    MissingParam { name: &'static str, position: usize },
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParam { name: &'static str, reason: String },
}

fn invalid(name: &'static str, reason: impl Into<String>) -> CompileError {
    CompileError::InvalidParam {
        name,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Console binary inside the container.
    pub program: String,
    /// Optional endpoint passed after `attach` (an IPC path, for example).
    pub attach_target: Option<String>,
    pub deploy_gas: u64,
    pub miner_threads: u32,
    pub unlock_duration_secs: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: "geth".to_string(),
            attach_target: None,
            deploy_gas: 4_700_000,
            miner_threads: 1,
            unlock_duration_secs: 300,
        }
    }
}

/// One line of console-executable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledCommand(String);

impl CompiledCommand {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn argv(&self) -> Vec<String> {
        tokenize(&self.0)
    }
}

impl std::fmt::Display for CompiledCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Splits a command into argv on the space character. Quoting is not
/// understood: `'a b'` yields two tokens.
pub fn tokenize(command: &str) -> Vec<String> {
    command
        .split(' ')
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct CommandCompiler {
    config: CompilerConfig,
}

impl CommandCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn compile(&self, intent: &Intent) -> Result<CompiledCommand, CompileError> {
        let script = self.script(intent)?;
        let mut command = format!("{} --exec {} attach", self.config.program, script);
        if let Some(target) = &self.config.attach_target {
            command.push(' ');
            command.push_str(target);
        }
        Ok(CompiledCommand(command))
    }

    pub fn compile_named(
        &self,
        name: &str,
        params: &[String],
        options: IntentOptions,
    ) -> Result<CompiledCommand, CompileError> {
        let intent = Intent::parse(name, params.to_vec())?.with_options(options);
        self.compile(&intent)
    }

    /// The console script alone, without the program/attach wrapper.
    pub fn script(&self, intent: &Intent) -> Result<String, CompileError> {
        let params = Params::new(&intent.params);
        let script = match intent.name {
            IntentName::GetAccounts => "eth.accounts".to_string(),
            IntentName::GetBalance => {
                let account = params.index(0, "account")?;
                format!("web3.fromWei(eth.getBalance(eth.accounts[{account}]),'ether')")
            }
            IntentName::GetBlockNumber => "eth.blockNumber".to_string(),
            IntentName::GetCoinbase => "eth.coinbase".to_string(),
            IntentName::GetPeerCount => "net.peerCount".to_string(),
            IntentName::GetPeers => "admin.peers".to_string(),
            IntentName::GetNodeInfo => "admin.nodeInfo".to_string(),
            IntentName::IsMining => "eth.mining".to_string(),
            IntentName::StartMiner => {
                let threads = params.number(0, "threads", u64::from(self.config.miner_threads))?;
                format!("miner.start({threads})")
            }
            IntentName::StopMiner => "miner.stop()".to_string(),
            IntentName::NewAccount => {
                let passphrase = string_literal("passphrase", params.required(0, "passphrase")?)?;
                format!("personal.newAccount({passphrase})")
            }
            IntentName::UnlockAccount => {
                let passphrase = string_literal("passphrase", params.required(0, "passphrase")?)?;
                let account = params.index(1, "account")?;
                let duration =
                    params.number(2, "duration", self.config.unlock_duration_secs)?;
                format!("personal.unlockAccount(eth.accounts[{account}],{passphrase},{duration})")
            }
            IntentName::SendTransaction => {
                let to = hex_literal("to", params.required(0, "to")?, Some(40))?;
                let amount = decimal("amount", params.required(1, "amount")?)?;
                let from = params.index(2, "from")?;
                format!(
                    "eth.sendTransaction({{from:eth.accounts[{from}],to:{to},value:web3.toWei({amount},'ether')}})"
                )
            }
            IntentName::GetTransaction => {
                let hash = hex_literal("hash", params.required(0, "hash")?, Some(64))?;
                format!("eth.getTransaction({hash})")
            }
            IntentName::GetTransactionReceipt | IntentName::GetContractAddress => {
                let hash = hex_literal("hash", params.required(0, "hash")?, Some(64))?;
                format!("eth.getTransactionReceipt({hash})")
            }
            IntentName::DeploySmartContract => self.deploy(&params)?,
            IntentName::InvokeContractFunction => self.invoke(&params, &intent.options)?,
        };
        Ok(script)
    }

    // params: abi, bytecode, constructor args (JSON array), value in ether
    fn deploy(&self, params: &Params<'_>) -> Result<String, CompileError> {
        let abi = interface_literal("abi", params.required(0, "abi")?)?;
        let data = hex_literal("bytecode", params.required(1, "bytecode")?, None)?;
        let args = arguments("constructorArgs", params.optional(2))?;
        let wei = params
            .optional(3)
            .map(|value| ether_to_wei("value", value))
            .transpose()?
            .unwrap_or_else(|| "0".to_string());

        let mut script = format!("eth.contract({abi}).new(");
        for arg in &args {
            script.push_str(arg);
            script.push(',');
        }
        script.push_str(&format!(
            "{{from:eth.accounts[0],data:{data},gas:{gas}{value}}})",
            gas = self.config.deploy_gas,
            value = value_clause(&wei),
        ));
        Ok(script)
    }

    // params: abi, address, function, args (JSON array), value in ether, caller index
    fn invoke(&self, params: &Params<'_>, options: &IntentOptions) -> Result<String, CompileError> {
        let abi = interface_literal("abi", params.required(0, "abi")?)?;
        let address = hex_literal("address", params.required(1, "address")?, Some(40))?;
        let function = identifier("function", params.required(2, "function")?)?;
        let mut args = arguments("args", params.optional(3))?;
        let wei = params
            .optional(4)
            .map(|value| ether_to_wei("value", value))
            .transpose()?
            .unwrap_or_else(|| "0".to_string());
        let caller = params.index(5, "caller")?;

        let tail = if options.call {
            format!("{CONTRACT_HANDLE}.{function}.call({})", args.join(","))
        } else {
            args.push(format!(
                "{{from:eth.accounts[{caller}]{}}}",
                value_clause(&wei)
            ));
            format!("{CONTRACT_HANDLE}.{function}.sendTransaction({})", args.join(","))
        };

        // Each exec is a fresh console, so identity, handle and call travel together.
        let statements = [
            format!("eth.defaultAccount=eth.accounts[{caller}]"),
            format!("{CONTRACT_HANDLE}=eth.contract({abi}).at({address})"),
            tail,
        ];
        Ok(statements.join(";"))
    }
}

struct Params<'a> {
    values: &'a [String],
}

impl<'a> Params<'a> {
    fn new(values: &'a [String]) -> Self {
        Self { values }
    }

    fn optional(&self, position: usize) -> Option<&'a str> {
        self.values
            .get(position)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, position: usize, name: &'static str) -> Result<&'a str, CompileError> {
        self.optional(position)
            .ok_or(CompileError::MissingParam { name, position })
    }

    fn number(&self, position: usize, name: &'static str, default: u64) -> Result<u64, CompileError> {
        match self.optional(position) {
            Some(raw) => raw
                .parse()
                .map_err(|_| invalid(name, format!("`{raw}` is not a non-negative integer"))),
            None => Ok(default),
        }
    }

    fn index(&self, position: usize, name: &'static str) -> Result<u64, CompileError> {
        self.number(position, name, 0)
    }
}

/// Replaces every whitespace character of a contract interface description
/// with a tab, one for one.
pub fn tabify_interface(abi: &str) -> String {
    abi.chars()
        .map(|ch| if ch.is_whitespace() { '\t' } else { ch })
        .collect()
}

fn interface_literal(name: &'static str, raw: &str) -> Result<String, CompileError> {
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|err| invalid(name, format!("not valid JSON: {err}")))?;
    if !parsed.is_array() {
        return Err(invalid(name, "expected a JSON array"));
    }
    Ok(tabify_interface(raw))
}

fn string_literal(name: &'static str, text: &str) -> Result<String, CompileError> {
    if text.contains(' ') {
        return Err(invalid(name, "contains a space"));
    }
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('\'');
    Ok(out)
}

fn hex_literal(name: &'static str, raw: &str, digits: Option<usize>) -> Result<String, CompileError> {
    let body = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    if body.is_empty() || !body.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(invalid(name, "expected a hex string"));
    }
    if let Some(expected) = digits {
        if body.len() != expected {
            return Err(invalid(
                name,
                format!("expected {expected} hex digits, got {}", body.len()),
            ));
        }
    }
    Ok(format!("'0x{body}'"))
}

fn identifier<'a>(name: &'static str, raw: &'a str) -> Result<&'a str, CompileError> {
    let mut chars = raw.chars();
    let valid_start = chars
        .next()
        .map(|ch| ch.is_ascii_alphabetic() || ch == '_' || ch == '$')
        .unwrap_or(false);
    if valid_start && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '$') {
        Ok(raw)
    } else {
        Err(invalid(name, format!("`{raw}` is not an identifier")))
    }
}

fn decimal<'a>(name: &'static str, raw: &'a str) -> Result<&'a str, CompileError> {
    let (whole, fraction) = match raw.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (raw, None),
    };
    let digits = |part: &str| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_digit());
    if digits(whole) && fraction.map(digits).unwrap_or(true) {
        Ok(raw)
    } else {
        Err(invalid(name, format!("`{raw}` is not a decimal amount")))
    }
}

/// Scales an ether amount to wei using digit arithmetic, so no precision is
/// lost to floating point.
pub fn ether_to_wei(name: &'static str, raw: &str) -> Result<String, CompileError> {
    let amount = decimal(name, raw)?;
    let (whole, fraction) = amount.split_once('.').unwrap_or((amount, ""));
    if fraction.len() > WEI_DECIMALS {
        return Err(invalid(name, "more than 18 decimal places"));
    }
    let mut digits = String::with_capacity(whole.len() + WEI_DECIMALS);
    digits.push_str(whole);
    digits.push_str(fraction);
    digits.extend(std::iter::repeat('0').take(WEI_DECIMALS - fraction.len()));
    let trimmed = digits.trim_start_matches('0');
    Ok(if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    })
}

fn value_clause(wei: &str) -> String {
    if wei == "0" {
        String::new()
    } else {
        format!(",value:{wei}")
    }
}

fn arguments(name: &'static str, raw: Option<&str>) -> Result<Vec<String>, CompileError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|err| invalid(name, format!("not valid JSON: {err}")))?;
    let Value::Array(items) = parsed else {
        return Err(invalid(name, "expected a JSON array"));
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(text) => string_literal(name, text),
            Value::Array(_) | Value::Object(_) => {
                let text = item.to_string();
                if text.contains(' ') {
                    Err(invalid(name, "contains a space"))
                } else {
                    Ok(text)
                }
            }
            other => Ok(other.to_string()),
        })
        .collect()
}
