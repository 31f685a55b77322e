//! Bridge between structured blockchain-console intents and a console running
//! inside a container.
//!
//! A request flows through four stages: the [`CommandCompiler`] turns an
//! [`Intent`] into one console command, the [`ExecutionBridge`] runs it in a
//! fresh exec session, the [`StreamDemux`] splits the hijacked stream into
//! stdout and stderr, and [`reconcile`] turns console text into a typed
//! result. [`ConsoleBridge`] wires the stages together.

pub mod compiler;
pub mod confirm;
pub mod demux;
pub mod docker;
pub mod error;
pub mod exec;
pub mod intent;
pub mod metrics;
pub mod mock;
pub mod reconcile;

use std::sync::Arc;

use tracing::{debug, info, warn};

pub use compiler::{CommandCompiler, CompiledCommand, CompilerConfig};
pub use confirm::{Confirmation, ReceiptPolling};
pub use demux::{encode_frame, AccumulatedOutput, StreamDemux, StreamKind};
pub use docker::{DockerClient, DockerEndpoint};
pub use error::{BridgeError, BridgeResult, ErrorKind, NotFound};
pub use exec::{
    ContainerHandle, ContainerRegistry, ContainerSelector, ExecFacility, ExecSettings,
    ExecutionBridge,
};
pub use intent::{Intent, IntentName, IntentOptions};
pub use reconcile::{reconcile, ConsoleValue};

#[derive(Clone)]
pub struct ConsoleBridge {
    compiler: Arc<CommandCompiler>,
    exec: ExecutionBridge,
    polling: ReceiptPolling,
}

impl ConsoleBridge {
    pub fn new(compiler: CommandCompiler, exec: ExecutionBridge) -> Self {
        Self {
            compiler: Arc::new(compiler),
            exec,
            polling: ReceiptPolling::default(),
        }
    }

    /// Bridge over a single runtime that is both registry and exec facility.
    pub fn with_runtime<R>(compiler: CommandCompiler, runtime: Arc<R>, settings: ExecSettings) -> Self
    where
        R: ContainerRegistry + ExecFacility + 'static,
    {
        let exec = ExecutionBridge::new(runtime.clone(), runtime).with_settings(settings);
        Self::new(compiler, exec)
    }

    pub fn with_receipt_polling(mut self, polling: ReceiptPolling) -> Self {
        self.polling = polling;
        self
    }

    pub fn compiler(&self) -> &CommandCompiler {
        &self.compiler
    }

    pub fn receipt_polling(&self) -> &ReceiptPolling {
        &self.polling
    }

    pub async fn list_containers(
        &self,
        name_filter: Option<&str>,
    ) -> BridgeResult<Vec<ContainerHandle>> {
        self.exec
            .list_containers(name_filter)
            .await
            .inspect_err(|err| metrics::record_error(err.kind()))
    }

    /// Runs the named intent against the selected container.
    pub async fn run_intent(
        &self,
        name: &str,
        container: &ContainerSelector,
        params: Vec<String>,
        options: IntentOptions,
    ) -> BridgeResult<ConsoleValue> {
        let intent = match Intent::parse(name, params) {
            Ok(intent) => intent.with_options(options),
            Err(err) => {
                let err = BridgeError::from(err);
                metrics::record_error(err.kind());
                return Err(err);
            }
        };
        self.run(&intent, container).await
    }

    pub async fn run(
        &self,
        intent: &Intent,
        container: &ContainerSelector,
    ) -> BridgeResult<ConsoleValue> {
        let result = self.run_inner(intent, container).await;
        if let Err(err) = &result {
            metrics::record_error(err.kind());
            if err.kind().is_client_error() {
                debug!(intent = %intent.name, container = %container, error = %err, "intent rejected");
            } else {
                warn!(intent = %intent.name, container = %container, error = %err, "intent failed");
            }
        }
        result
    }

    async fn run_inner(
        &self,
        intent: &Intent,
        container: &ContainerSelector,
    ) -> BridgeResult<ConsoleValue> {
        // Compile first so a bad request never touches the runtime.
        let command = self.compiler.compile(intent)?;
        let handle = self.exec.resolve(container).await?;
        info!(
            intent = %intent.name,
            container = %handle.display_name(),
            call = intent.options.call,
            "running intent"
        );
        metrics::record_exec(intent.name);
        let output = self.exec.execute(&handle, &command).await?;
        reconcile(intent.name, &output)
    }
}
