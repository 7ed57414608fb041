use actix_cors::Cors;
use actix_web::middleware::Condition;
use actix_web::{App, HttpServer, dev::Server, web, web::Data};
use actix_web_httpauth::middleware::HttpAuthentication;
use anyhow::Context;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use tracing::info;
use tracing_actix_web::TracingLogger;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use console_config::shared::RdbConnectionConfig;
use console_core::jobs::TaskSender;
use console_core::rdb::RdbManager;

use crate::authentication::auth_validator;
use crate::config::OuterConfig;
use crate::email::EmailClient;
use crate::env::OuterEnv;
use crate::routes::{
    ErrorMessage,
    auth::{
        LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, ResetPasswordRequest,
        SendCodeRequest, SendCodeResponse, login, register, reset_password, send_code,
    },
    combinator::{
        CreateKvRequest, CreateRdbRequest, CreateResourceResponse, KvView, ListKvsResponse,
        ListRdbsResponse, RdbView, create_kv, create_rdb, delete_kv, delete_rdb, list_kvs,
        list_rdbs, read_rdb,
    },
    domains::{
        AddDomainRequest, DomainView, ListDomainsResponse, add_custom_domain, delete_custom_domain,
        list_custom_domains, read_custom_domain,
    },
    health_check::health_check,
    tasks::{ReadTaskResponse, read_task_status},
    workers::{
        CreateWorkerRequest, CreateWorkerResponse, DeployRequest, DeployResponse,
        DeployVersionView, ListWorkersResponse, ReadWorkerResponse, SetEntryRequest,
        WorkerSummary, create_worker, delete_worker, deploy_worker, list_workers,
        read_worker, read_worker_env, read_worker_secrets, set_worker_env, set_worker_secrets,
    },
};

/// Grace period for in-flight requests during shutdown.
const SHUTDOWN_GRACE_SECS: u64 = 5;

pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    /// Wires up the public gateway.
    ///
    /// The control-plane database must be reachable; the relational
    /// cluster is dialed eagerly in production (billing reads are part of
    /// the tenant surface) and lazily elsewhere.
    pub async fn build(config: OuterConfig) -> Result<Self, anyhow::Error> {
        let pool = PgPoolOptions::new()
            .connect(&config.db_dsn)
            .await
            .context("failed to connect to the control-plane database")?;
        info!("database connected");

        let rdb_config =
            RdbConnectionConfig::from_env().context("failed to load rdb configuration")?;
        let rdb = if config.environment.is_prod() {
            Arc::new(
                RdbManager::connect(rdb_config)
                    .await
                    .context("failed to connect to the relational cluster")?,
            )
        } else {
            Arc::new(RdbManager::new(rdb_config))
        };

        let env = OuterEnv {
            domain: config.domain.clone(),
            jwt_secret: config.jwt_secret.clone().into_bytes(),
            tasks: TaskSender::new(&config.inner_endpoint),
            rdb,
            email: EmailClient::new(config.resend_api_key.clone()),
            environment: config.environment.clone(),
        };

        let listener =
            TcpListener::bind(&config.listen).context("failed to bind the listen address")?;
        let port = listener.local_addr()?.port();

        let server = run(listener, pool, env)?;

        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

fn run(listener: TcpListener, pool: PgPool, env: OuterEnv) -> Result<Server, anyhow::Error> {
    let permissive_cors = env.environment.is_test();

    let pool = Data::new(pool);
    let env = Data::new(env);

    #[derive(OpenApi)]
    #[openapi(
        paths(
            crate::routes::health_check::health_check,
            crate::routes::auth::register,
            crate::routes::auth::login,
            crate::routes::auth::send_code,
            crate::routes::auth::reset_password,
            crate::routes::workers::create_worker,
            crate::routes::workers::list_workers,
            crate::routes::workers::read_worker,
            crate::routes::workers::delete_worker,
            crate::routes::workers::deploy_worker,
            crate::routes::workers::read_worker_env,
            crate::routes::workers::set_worker_env,
            crate::routes::workers::read_worker_secrets,
            crate::routes::workers::set_worker_secrets,
            crate::routes::combinator::create_rdb,
            crate::routes::combinator::list_rdbs,
            crate::routes::combinator::read_rdb,
            crate::routes::combinator::delete_rdb,
            crate::routes::combinator::create_kv,
            crate::routes::combinator::list_kvs,
            crate::routes::combinator::delete_kv,
            crate::routes::domains::add_custom_domain,
            crate::routes::domains::list_custom_domains,
            crate::routes::domains::read_custom_domain,
            crate::routes::domains::delete_custom_domain,
            crate::routes::tasks::read_task_status,
        ),
        components(schemas(
            ErrorMessage,
            RegisterRequest,
            RegisterResponse,
            LoginRequest,
            LoginResponse,
            SendCodeRequest,
            SendCodeResponse,
            ResetPasswordRequest,
            CreateWorkerRequest,
            CreateWorkerResponse,
            WorkerSummary,
            ListWorkersResponse,
            ReadWorkerResponse,
            DeployVersionView,
            DeployRequest,
            DeployResponse,
            SetEntryRequest,
            CreateRdbRequest,
            CreateResourceResponse,
            RdbView,
            ListRdbsResponse,
            CreateKvRequest,
            KvView,
            ListKvsResponse,
            AddDomainRequest,
            DomainView,
            ListDomainsResponse,
            ReadTaskResponse,
        ))
    )]
    struct ApiDoc;

    let openapi = ApiDoc::openapi();

    let server = HttpServer::new(move || {
        let authentication = HttpAuthentication::bearer(auth_validator);

        App::new()
            .wrap(Condition::new(permissive_cors, Cors::permissive()))
            .wrap(TracingLogger::default())
            .service(health_check)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi.clone()),
            )
            // Public routes.
            .service(register)
            .service(login)
            .service(send_code)
            .service(reset_password)
            // Signature-protected: verification happens in the handler,
            // which needs the raw body bytes.
            .service(deploy_worker)
            // Session-protected routes.
            .service(
                web::scope("")
                    .wrap(authentication)
                    .service(create_worker)
                    .service(list_workers)
                    .service(read_worker)
                    .service(delete_worker)
                    .service(read_worker_env)
                    .service(set_worker_env)
                    .service(read_worker_secrets)
                    .service(set_worker_secrets)
                    .service(create_rdb)
                    .service(list_rdbs)
                    .service(read_rdb)
                    .service(delete_rdb)
                    .service(create_kv)
                    .service(list_kvs)
                    .service(delete_kv)
                    .service(add_custom_domain)
                    .service(list_custom_domains)
                    .service(read_custom_domain)
                    .service(delete_custom_domain)
                    .service(read_task_status),
            )
            .app_data(pool.clone())
            .app_data(env.clone())
    })
    .shutdown_timeout(SHUTDOWN_GRACE_SECS)
    .listen(listener)?
    .run();

    Ok(server)
}
