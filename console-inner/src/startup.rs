use actix_web::{App, HttpServer, dev::Server, web::Data};
use anyhow::Context;
use kube::config::{KubeConfigOptions, Kubeconfig};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;

use console_config::shared::RdbConnectionConfig;
use console_core::rdb::RdbManager;

use crate::cluster::crds;
use crate::config::InnerConfig;
use crate::controller::Controller;
use crate::cron::CronScheduler;
use crate::dns::SystemTxtLookup;
use crate::env::Env;
use crate::jobs::auth::UserAuditJob;
use crate::jobs::domain::DomainCheckJob;
use crate::jobs::JobRegistry;
use crate::processor::{self, DEFAULT_POOL_SIZE, DEFAULT_QUEUE_SIZE, JobProcessor};
use crate::routes::accept_task::accept_task;
use crate::routes::combinator_internal::{report_usage, retrieve_secret_by_id};
use crate::routes::deploy::deploy_worker;
use crate::routes::health_check::health_check;

/// Interval of the user audit job.
const AUDIT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Interval of the custom-domain recheck job.
const DOMAIN_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Grace period for in-flight requests during shutdown.
const SHUTDOWN_GRACE_SECS: u64 = 5;

pub struct Application {
    port: u16,
    server: Server,
    processor: JobProcessor,
    processor_handle: processor::ProcessorHandle,
    cron: crate::cron::CronHandle,
    controller: Controller,
}

impl Application {
    /// Wires up every dependency of the inner gateway.
    ///
    /// The control-plane database and the cluster API are hard
    /// requirements; the RDB cluster degrades to a warning so the
    /// controller keeps converging workloads while the fabric is down.
    pub async fn build(config: InnerConfig) -> Result<Self, anyhow::Error> {
        let pool = PgPoolOptions::new()
            .connect(&config.db_dsn)
            .await
            .context("failed to connect to the control-plane database")?;
        info!("database connected");

        let rdb = match RdbConnectionConfig::from_env() {
            Ok(rdb_config) => match RdbManager::connect(rdb_config).await {
                Ok(manager) => Some(Arc::new(manager)),
                Err(e) => {
                    warn!("rdb init failed, continuing without rdb support: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("rdb config invalid, continuing without rdb support: {e}");
                None
            }
        };

        let kube = build_kube_client(config.kubeconfig.as_deref())
            .await
            .context("failed to initialize the cluster client")?;
        crds::ensure_crds(&kube).await.context("failed to ensure CRDs")?;
        info!("cluster client initialized, CRDs ensured");

        let resolver = Arc::new(
            SystemTxtLookup::from_system_conf().context("failed to build the dns resolver")?,
        );

        let env = Arc::new(Env {
            pool: pool.clone(),
            kube,
            rdb,
            domain: config.domain.clone(),
            http: reqwest::Client::new(),
            resolver,
        });

        let controller = Controller::start(env.clone()).await;

        let (processor, processor_handle) =
            processor::start(pool.clone(), DEFAULT_QUEUE_SIZE, DEFAULT_POOL_SIZE);
        let registry = JobRegistry::new(env.clone());

        let mut cron = CronScheduler::new(processor.clone());
        cron.register(AUDIT_INTERVAL, Arc::new(UserAuditJob::new(env.clone())));
        cron.register(DOMAIN_CHECK_INTERVAL, Arc::new(DomainCheckJob::new(env.clone())));
        let cron = cron.start();

        // One audit right away so a restarted control plane converges
        // without waiting a day.
        processor.submit(Box::new(UserAuditJob::new(env.clone()))).await;

        let listener =
            TcpListener::bind(&config.listen).context("failed to bind the listen address")?;
        let port = listener.local_addr()?.port();

        let server = run(listener, pool, env, processor.clone(), registry)?;

        Ok(Self {
            port,
            server,
            processor,
            processor_handle,
            cron,
            controller,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serves until the process receives a termination signal, then shuts
    /// the pieces down in dependency order: HTTP first, then cron, then
    /// the queue, then the informers.
    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        self.server.await?;

        self.cron.stop().await;
        drop(self.processor);
        self.processor_handle.close().await;
        self.controller.shutdown();

        Ok(())
    }
}

async fn build_kube_client(kubeconfig: Option<&str>) -> Result<kube::Client, anyhow::Error> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig at {path}"))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => kube::Config::infer().await?,
    };
    Ok(kube::Client::try_from(config)?)
}

fn run(
    listener: TcpListener,
    pool: PgPool,
    env: Arc<Env>,
    processor: JobProcessor,
    registry: JobRegistry,
) -> Result<Server, anyhow::Error> {
    let pool = Data::new(pool);
    let env = Data::new(env);
    let processor = Data::new(processor);
    let registry = Data::new(registry);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .service(health_check)
            .service(accept_task)
            .service(deploy_worker)
            .service(retrieve_secret_by_id)
            .service(report_usage)
            .app_data(pool.clone())
            .app_data(env.clone())
            .app_data(processor.clone())
            .app_data(registry.clone())
    })
    .shutdown_timeout(SHUTDOWN_GRACE_SECS)
    .listen(listener)?
    .run();

    Ok(server)
}
