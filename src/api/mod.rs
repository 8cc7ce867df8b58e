mod error;

use axum::{
    Router,
    extract::{Json, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use error::ApiError;

use crate::core::{
    Allocation, DataSource, MarketData, ResultTable, ResultsType, SimulationConfig,
    SimulationError, SimulationType, SweepResult, run_sweep,
};

const MAX_SIMULATIONS: u32 = 20_000;
const MAX_YEARS: u32 = 100;
const MAX_BUCKETS: u32 = 101;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliSimulationType {
    Hist,
    Norm,
}

impl From<CliSimulationType> for SimulationType {
    fn from(value: CliSimulationType) -> Self {
        match value {
            CliSimulationType::Hist => SimulationType::Historical,
            CliSimulationType::Norm => SimulationType::Normal,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliResultsType {
    Ratio,
    Value,
    Returns,
}

impl From<CliResultsType> for ResultsType {
    fn from(value: CliResultsType) -> Self {
        match value {
            CliResultsType::Ratio => ResultsType::Ratio,
            CliResultsType::Value => ResultsType::Value,
            CliResultsType::Returns => ResultsType::Returns,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiSimulationType {
    #[serde(alias = "historical")]
    Hist,
    #[serde(alias = "normal")]
    Norm,
}

impl From<ApiSimulationType> for CliSimulationType {
    fn from(value: ApiSimulationType) -> Self {
        match value {
            ApiSimulationType::Hist => CliSimulationType::Hist,
            ApiSimulationType::Norm => CliSimulationType::Norm,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiResultsType {
    #[serde(alias = "survival")]
    Ratio,
    Value,
    #[serde(alias = "return")]
    Returns,
}

impl From<ApiResultsType> for CliResultsType {
    fn from(value: ApiResultsType) -> Self {
        match value {
            ApiResultsType::Ratio => CliResultsType::Ratio,
            ApiResultsType::Value => CliResultsType::Value,
            ApiResultsType::Returns => CliResultsType::Returns,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SweepPayload {
    simulations: Option<u32>,
    #[serde(alias = "maxNumberYears")]
    max_years: Option<u32>,
    buckets: Option<u32>,
    bucket_size: Option<f64>,
    simulation_type: Option<ApiSimulationType>,
    results_type: Option<ApiResultsType>,

    equity_share: Option<f64>,
    bond_share: Option<f64>,
    annual_expenditures: Option<f64>,
    inflation: Option<f64>,
    dividend_yield: Option<f64>,
    annual_pension: Option<f64>,
    pension_start_year: Option<u32>,

    trading_days_in_year: Option<u32>,
    seed: Option<u64>,

    #[serde(flatten)]
    market: MarketData,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "survival sweep",
    about = "Monte Carlo retirement survival sweep over years elapsed x starting capital"
)]
struct Cli {
    #[arg(
        long,
        help = "Market data JSON (equityReturns/bondReturns or equityCloses/bondCloses)"
    )]
    data: Option<PathBuf>,
    #[arg(long, default_value_t = 1000, help = "Simulated paths per cell")]
    simulations: u32,
    #[arg(long, default_value_t = 41, help = "Number of horizon rows in the table")]
    max_years: u32,
    #[arg(
        long,
        default_value_t = 11,
        help = "Capital bucket count; the table has buckets - 1 columns"
    )]
    buckets: u32,
    #[arg(long, default_value_t = 100_000.0)]
    bucket_size: f64,
    #[arg(long, value_enum, default_value_t = CliSimulationType::Norm)]
    simulation_type: CliSimulationType,
    #[arg(long, value_enum, default_value_t = CliResultsType::Ratio)]
    results_type: CliResultsType,
    #[arg(long, default_value_t = 1.0, help = "Equity share, 0 or 1")]
    equity_share: f64,
    #[arg(long, default_value_t = 0.0, help = "Bond share, 0 or 1")]
    bond_share: f64,
    #[arg(long, default_value_t = 30_000.0)]
    annual_expenditures: f64,
    #[arg(long, default_value_t = 3.0, help = "Annual inflation in percent")]
    inflation: f64,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Equity dividend yield in percent, added to sampled equity returns"
    )]
    dividend_yield: f64,
    #[arg(long, default_value_t = 24_000.0)]
    annual_pension: f64,
    #[arg(
        long,
        default_value_t = 15,
        help = "First simulated year that receives the pension"
    )]
    pension_start_year: u32,
    #[arg(
        long,
        default_value_t = 252,
        help = "Trading days per year when converting daily closes"
    )]
    trading_days_in_year: u32,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, help = "Print the JSON response instead of a text grid")]
    json: bool,
}

#[derive(Debug)]
struct ApiRequest {
    config: SimulationConfig,
    market: MarketData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SweepResponse {
    results_type: ResultsType,
    simulation_type: SimulationType,
    allocation: Allocation,
    seed: u64,
    number_simulations: u32,
    bucket_size: f64,
    row_labels: Vec<u32>,
    column_labels: Vec<String>,
    values: Vec<Vec<f64>>,
    data_source: DataSource,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

fn build_config(cli: &Cli) -> Result<SimulationConfig, SimulationError> {
    for (field, value, max) in [
        ("number_simulations", cli.simulations, MAX_SIMULATIONS),
        ("max_number_years", cli.max_years, MAX_YEARS),
        ("buckets", cli.buckets, MAX_BUCKETS),
    ] {
        if value > max {
            return Err(SimulationError::config(field, format!("must be <= {max}")));
        }
    }

    let config = SimulationConfig {
        trading_days_in_year: cli.trading_days_in_year,
        number_simulations: cli.simulations,
        max_number_years: cli.max_years,
        buckets: cli.buckets,
        bucket_size: cli.bucket_size,
        simulation_type: cli.simulation_type.into(),
        results_type: cli.results_type.into(),
        equity_share: cli.equity_share,
        bond_share: cli.bond_share,
        annual_expenditures: cli.annual_expenditures,
        inflation: cli.inflation / 100.0,
        dividend_yield: cli.dividend_yield / 100.0,
        annual_pension: cli.annual_pension,
        pension_start_year: cli.pension_start_year,
        seed: cli.seed,
    };
    config.validate()?;
    Ok(config)
}

fn execute(request: ApiRequest) -> Result<(SweepResult, SweepResponse), SimulationError> {
    let ApiRequest { config, market } = request;
    let source = market.source.clone();
    let (equity, bonds) = market.into_series(config.trading_days_in_year)?;
    let result = run_sweep(&equity, &bonds, &config)?;
    let response = build_sweep_response(&config, &result, source);
    Ok((result, response))
}

/// Entry point for `survival sweep ...`; `args[0]` is treated as the binary name.
pub fn run_cli<I, T>(args: I) -> Result<(), ApiError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    let config = build_config(&cli)?;
    let Some(path) = cli.data.as_ref() else {
        return Err(ApiError::Usage("--data <file> is required".to_string()));
    };
    let json = fs::read_to_string(path).map_err(|source| ApiError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let market = MarketData::from_json(&json)?;

    let results_type = config.results_type;
    let (result, response) = execute(ApiRequest { config, market })?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", render_table(&result.table, results_type));
        println!("seed: {}", result.seed);
    }
    Ok(())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "survival HTTP API listening");

    axum::serve(listener, router()).await
}

fn router() -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/sweep", post(sweep_handler))
        .fallback(not_found_handler)
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn sweep_handler(
    payload: Result<Json<SweepPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) =
        payload.map_err(|rejection| ApiError::InvalidBody(rejection.body_text()))?;
    let request = api_request_from_payload(payload)?;
    let (_, response) = tokio::task::spawn_blocking(move || execute(request))
        .await
        .map_err(|e| {
            warn!(error = %e, "sweep task did not complete");
            ApiError::Internal
        })??;
    Ok(json_response(StatusCode::OK, response))
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, SimulationError> {
    let payload = serde_json::from_str::<SweepPayload>(json)
        .map_err(|e| SimulationError::Data(format!("Invalid API JSON payload: {e}")))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SweepPayload) -> Result<ApiRequest, SimulationError> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.simulations {
        cli.simulations = v;
    }
    if let Some(v) = payload.max_years {
        cli.max_years = v;
    }
    if let Some(v) = payload.buckets {
        cli.buckets = v;
    }
    if let Some(v) = payload.bucket_size {
        cli.bucket_size = v;
    }
    if let Some(v) = payload.simulation_type {
        cli.simulation_type = v.into();
    }
    if let Some(v) = payload.results_type {
        cli.results_type = v.into();
    }
    if let Some(v) = payload.equity_share {
        cli.equity_share = v;
    }
    if let Some(v) = payload.bond_share {
        cli.bond_share = v;
    }
    if let Some(v) = payload.annual_expenditures {
        cli.annual_expenditures = v;
    }
    if let Some(v) = payload.inflation {
        cli.inflation = v;
    }
    if let Some(v) = payload.dividend_yield {
        cli.dividend_yield = v;
    }
    if let Some(v) = payload.annual_pension {
        cli.annual_pension = v;
    }
    if let Some(v) = payload.pension_start_year {
        cli.pension_start_year = v;
    }
    if let Some(v) = payload.trading_days_in_year {
        cli.trading_days_in_year = v;
    }
    cli.seed = payload.seed;

    let config = build_config(&cli)?;
    Ok(ApiRequest {
        config,
        market: payload.market,
    })
}

fn default_cli_for_api() -> Cli {
    Cli {
        data: None,
        simulations: 1000,
        max_years: 41,
        buckets: 11,
        bucket_size: 100_000.0,
        simulation_type: CliSimulationType::Norm,
        results_type: CliResultsType::Ratio,
        equity_share: 1.0,
        bond_share: 0.0,
        annual_expenditures: 30_000.0,
        inflation: 3.0,
        dividend_yield: 2.0,
        annual_pension: 24_000.0,
        pension_start_year: 15,
        trading_days_in_year: 252,
        seed: None,
        json: false,
    }
}

fn build_sweep_response(
    config: &SimulationConfig,
    result: &SweepResult,
    data_source: DataSource,
) -> SweepResponse {
    SweepResponse {
        results_type: config.results_type,
        simulation_type: config.simulation_type,
        allocation: result.allocation,
        seed: result.seed,
        number_simulations: config.number_simulations,
        bucket_size: config.bucket_size,
        row_labels: result.table.row_labels(),
        column_labels: result.table.column_labels(),
        values: result.table.to_rows(),
        data_source,
    }
}

/// Plain-text grid: one row per year elapsed, one column per capital bucket.
pub fn render_table(table: &ResultTable, results_type: ResultsType) -> String {
    let header = table.column_labels();
    let body: Vec<Vec<String>> = (0..table.rows())
        .map(|r| {
            table
                .row(r)
                .iter()
                .map(|v| format_cell(*v, results_type))
                .collect()
        })
        .collect();

    let width = header
        .iter()
        .chain(body.iter().flatten())
        .map(String::len)
        .max()
        .unwrap_or(0)
        .max(4);

    let mut out = format!("{:>5}", "years");
    for label in &header {
        out.push_str(&format!(" {label:>width$}"));
    }
    out.push('\n');
    for (year, cells) in table.row_labels().iter().zip(&body) {
        out.push_str(&format!("{year:>5}"));
        for cell in cells {
            out.push_str(&format!(" {cell:>width$}"));
        }
        out.push('\n');
    }
    out
}

fn format_cell(value: f64, results_type: ResultsType) -> String {
    match results_type {
        ResultsType::Ratio => format!("{value:.0}"),
        ResultsType::Value => format_thousands(value),
        ResultsType::Returns => format!("{value:.2}"),
    }
}

fn format_thousands(value: f64) -> String {
    let rounded = value.round();
    if !rounded.is_finite() {
        return format!("{rounded}");
    }
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0.0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}
