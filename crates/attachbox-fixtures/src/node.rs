//! The JSON-RPC surface served by the fixture node.
//!
//! Every transport shares one [`NodeState`]; what differs is the set of
//! modules each transport exposes, so each listener gets its own [`Api`].

use std::collections::BTreeMap;
use std::sync::Arc;

use attachbox::console::{self, Banner};
use attachbox::transport::rpc::{
    RpcErrorObject, RpcRequest, RpcResponse, INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
use serde_json::{json, Value};

/// Client name shown in the greeting line.
pub const NODE_NAME: &str = "skaina";
pub const NODE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const RUNTIME_VERSION: &str = concat!("rust", env!("CARGO_PKG_RUST_VERSION"));
/// Coinbase used when `--etherbase` is not given.
pub const DEFAULT_ETHERBASE: &str = "0x8605cdbbdb6d264aa742e77020dcbc58fcdce182";
/// Every module reports the same version.
pub const MODULE_VERSION: &str = "1.0";

/// Modules reachable over IPC and from the node's own console.
pub const IPC_MODULES: &[&str] = &[
    "admin", "debug", "eth", "miner", "net", "personal", "rpc", "txpool", "web3",
];

/// Default `--rpcapi` / `--wsapi` value.
pub const DEFAULT_REMOTE_API: &str = "eth,net,web3";

/// Methods answered regardless of the exposed modules.
const ALWAYS_SERVED: &[&str] = &["web3_clientVersion"];

/// Chain id reported by `net_version`.
const NETWORK_ID: &str = "1337";

/// `skaina/v0.1.0/linux-x86_64/rust1.80`.
pub fn client_version() -> String {
    format!(
        "{NODE_NAME}/v{NODE_VERSION}/{}-{}/{RUNTIME_VERSION}",
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Module map for the local console and IPC.
///
/// `shh` is only served when whisper is enabled.
pub fn ipc_modules(shh: bool) -> BTreeMap<String, String> {
    let mut modules = module_map(IPC_MODULES.iter().copied());
    if shh {
        modules.insert("shh".to_string(), MODULE_VERSION.to_string());
    }
    modules
}

/// Module map for a comma separated `--rpcapi` style list.
///
/// `rpc` is always served so clients can discover the others.
pub fn remote_modules(api: &str) -> BTreeMap<String, String> {
    let mut modules = module_map(api.split(',').map(str::trim).filter(|name| !name.is_empty()));
    modules.insert("rpc".to_string(), MODULE_VERSION.to_string());
    modules
}

fn module_map<'a>(names: impl Iterator<Item = &'a str>) -> BTreeMap<String, String> {
    names
        .map(|name| (name.to_ascii_lowercase(), MODULE_VERSION.to_string()))
        .collect()
}

/// Chain and account state shared by every endpoint.
#[derive(Clone, Debug)]
pub struct NodeState {
    pub coinbase: String,
    pub datadir: String,
    pub block: u64,
    pub block_time: i64,
}

impl NodeState {
    pub fn new(coinbase: impl Into<String>, datadir: impl Into<String>) -> Self {
        Self {
            coinbase: coinbase.into(),
            datadir: datadir.into(),
            block: 0,
            block_time: 0,
        }
    }
}

/// One endpoint's view of the node.
#[derive(Clone, Debug)]
pub struct Api {
    state: Arc<NodeState>,
    modules: Arc<BTreeMap<String, String>>,
}

impl Api {
    pub fn new(state: Arc<NodeState>, modules: BTreeMap<String, String>) -> Self {
        Self {
            state,
            modules: Arc::new(modules),
        }
    }

    /// Banner the node's own console prints on startup.
    pub fn banner(&self) -> Banner {
        let instance = client_version();
        Banner {
            name: console::client_name(&instance).to_string(),
            instance,
            coinbase: self.state.coinbase.clone(),
            block: self.state.block,
            block_time: self.state.block_time,
            datadir: self
                .modules
                .contains_key("admin")
                .then(|| self.state.datadir.clone()),
            modules: (*self.modules).clone(),
        }
    }

    /// Dispatch one method call.
    ///
    /// `web3_clientVersion` answers on every endpoint, whatever modules it
    /// serves, so attached consoles can always print the instance line.
    ///
    /// # Errors
    /// A JSON-RPC error object when the method is unknown or not exposed.
    pub fn call(&self, method: &str, params: &[Value]) -> Result<Value, RpcErrorObject> {
        let exposed = ALWAYS_SERVED.contains(&method)
            || method
                .split_once('_')
                .is_some_and(|(module, _)| self.modules.contains_key(module));
        if !exposed {
            return Err(not_found(method));
        }
        let state = &self.state;
        let result = match method {
            "rpc_modules" => json!(*self.modules),
            "web3_clientVersion" => json!(client_version()),
            "eth_coinbase" => json!(state.coinbase),
            "eth_accounts" => json!([state.coinbase]),
            "eth_blockNumber" => json!(console::quantity(state.block)),
            "eth_getBlockByNumber" => self.block_header(params.first())?,
            "eth_mining" | "net_listening" => json!(false),
            "net_version" => json!(NETWORK_ID),
            "net_peerCount" => json!(console::quantity(0)),
            "admin_datadir" => json!(state.datadir),
            "admin_peers" => json!([]),
            "txpool_status" => json!({ "pending": "0x0", "queued": "0x0" }),
            _ => return Err(not_found(method)),
        };
        Ok(result)
    }

    fn block_header(&self, selector: Option<&Value>) -> Result<Value, RpcErrorObject> {
        let wanted = match selector.and_then(Value::as_str) {
            None | Some("latest" | "earliest" | "pending") => Some(self.state.block),
            Some(raw) => console::parse_quantity(raw),
        };
        match wanted {
            Some(number) if number == self.state.block => Ok(json!({
                "number": console::quantity(number),
                "timestamp": console::quantity(u64::try_from(self.state.block_time).unwrap_or(0)),
                "miner": self.state.coinbase,
            })),
            Some(_) => Ok(Value::Null),
            None => Err(RpcErrorObject {
                code: INVALID_REQUEST,
                message: "invalid block number".to_string(),
            }),
        }
    }

    /// Answer one JSON-RPC message given as text.
    pub fn handle_message(&self, text: &str) -> String {
        let response = match serde_json::from_str::<RpcRequest>(text.trim()) {
            Ok(request) => self.respond(request),
            Err(err) => RpcResponse::failure(Value::Null, PARSE_ERROR, err.to_string()),
        };
        serde_json::to_string(&response).unwrap_or_default()
    }

    fn respond(&self, request: RpcRequest) -> RpcResponse {
        if request.jsonrpc != JSONRPC_VERSION {
            return RpcResponse::failure(request.id, INVALID_REQUEST, "unsupported jsonrpc version");
        }
        let params = match request.params {
            Value::Array(values) => values,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        match self.call(&request.method, &params) {
            Ok(result) => RpcResponse::success(request.id, result),
            Err(error) => RpcResponse::failure(request.id, error.code, error.message),
        }
    }

    /// Evaluate one console line, returning the text to print before the
    /// next prompt, or `None` when the console should exit.
    pub fn evaluate(&self, line: &str) -> Option<String> {
        match console::Command::parse(line) {
            Ok(console::Command::Exit) => None,
            Ok(console::Command::Empty) => Some(String::new()),
            Ok(console::Command::Call { method, params }) => Some(match self.call(&method, &params) {
                Ok(value) => format!("{}\n", console::render_value(&value)),
                Err(error) => format!("{}\n", console::render_error(&error.message)),
            }),
            Err(err) => Some(format!("{}\n", console::render_error(&err.message))),
        }
    }
}

fn not_found(method: &str) -> RpcErrorObject {
    RpcErrorObject {
        code: METHOD_NOT_FOUND,
        message: format!("the method {method} does not exist/is not available"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipc_api() -> Api {
        Api::new(
            Arc::new(NodeState::new(DEFAULT_ETHERBASE, "/tmp/node")),
            ipc_modules(true),
        )
    }

    #[test]
    fn module_lists_match_the_console_format() {
        assert_eq!(
            console::format_modules(&ipc_modules(true)),
            "admin:1.0 debug:1.0 eth:1.0 miner:1.0 net:1.0 personal:1.0 rpc:1.0 shh:1.0 txpool:1.0 web3:1.0"
        );
        assert_eq!(
            console::format_modules(&remote_modules(DEFAULT_REMOTE_API)),
            "eth:1.0 net:1.0 rpc:1.0 web3:1.0"
        );
        assert!(!ipc_modules(false).contains_key("shh"));
    }

    #[test]
    fn client_version_has_four_parts() {
        let version = client_version();
        assert_eq!(version.split('/').count(), 4);
        assert!(version.starts_with("skaina/v"));
        assert!(version.ends_with(RUNTIME_VERSION));
    }

    #[test]
    fn banner_shows_datadir_only_with_admin() {
        let state = Arc::new(NodeState::new(DEFAULT_ETHERBASE, "/tmp/node"));
        let local = Api::new(state.clone(), ipc_modules(false)).banner();
        assert_eq!(local.datadir.as_deref(), Some("/tmp/node"));
        let remote = Api::new(state, remote_modules("eth")).banner();
        assert_eq!(remote.datadir, None);
        assert!(remote.render().starts_with("Welcome to the skaina JavaScript console!\n\n"));
    }

    #[test]
    fn unexposed_modules_are_not_found() {
        let api = Api::new(
            Arc::new(NodeState::new(DEFAULT_ETHERBASE, "/tmp/node")),
            remote_modules("eth"),
        );
        let err = api.call("admin_datadir", &[]).unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert_eq!(api.call("eth_coinbase", &[]).unwrap(), json!(DEFAULT_ETHERBASE));
        assert_eq!(api.call("web3_sha3", &[]).unwrap_err().code, METHOD_NOT_FOUND);
    }

    #[test]
    fn client_version_is_served_without_web3() {
        let api = Api::new(
            Arc::new(NodeState::new(DEFAULT_ETHERBASE, "/tmp/node")),
            remote_modules("admin,eth"),
        );
        assert!(!api.banner().modules.contains_key("web3"));
        assert_eq!(api.call("web3_clientVersion", &[]).unwrap(), json!(client_version()));
    }

    #[test]
    fn handles_raw_messages() {
        let api = ipc_api();
        let reply: RpcResponse = serde_json::from_str(
            &api.handle_message(r#"{"jsonrpc":"2.0","id":7,"method":"eth_blockNumber","params":[]}"#),
        )
        .unwrap();
        assert_eq!(reply.id, json!(7));
        assert_eq!(reply.into_outcome().unwrap(), json!("0x0"));

        let reply: RpcResponse = serde_json::from_str(&api.handle_message("{not json")).unwrap();
        assert_eq!(reply.into_outcome().unwrap_err().code, PARSE_ERROR);
    }

    #[test]
    fn block_zero_has_epoch_timestamp() {
        let api = ipc_api();
        let header = api.call("eth_getBlockByNumber", &[json!("0x0"), json!(false)]).unwrap();
        assert_eq!(header["timestamp"], "0x0");
        assert_eq!(api.call("eth_getBlockByNumber", &[json!("0x5")]).unwrap(), Value::Null);
    }

    #[test]
    fn console_lines_evaluate() {
        let api = ipc_api();
        assert_eq!(api.evaluate("eth.blockNumber").unwrap(), "\"0x0\"\n");
        assert_eq!(api.evaluate("").unwrap(), "");
        assert!(api.evaluate("exit").is_none());
        assert!(api.evaluate("bogus").unwrap().starts_with("Error: "));
        assert!(api
            .evaluate("miner.start()")
            .unwrap()
            .starts_with("Error: the method miner_start does not exist"));
    }
}
