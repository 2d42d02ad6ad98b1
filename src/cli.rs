//! CLI definition and dispatch.
//!
//! Every subcommand reads one INI file. Machine-readable JSON goes to stdout
//! or `--output`; progress and summaries go to stderr.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

use crate::adapters::artifact_codec::compress_json;
use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{BacktestConfig, BacktestEngine, BacktestEngineResult, run_backtest};
use crate::domain::candle::{Candle, Timeframe};
use crate::domain::config_validation::{
    optional_number, parse_condition_lines, parse_date, parse_parameter_definitions,
    validate_backtest_config, validate_data_source, validate_optimize_config,
    validate_screener_config, validate_strategy_config, validate_walk_forward_config,
};
use crate::domain::error::{IndicatorError, StratbenchError};
use crate::domain::metrics::{PerformanceCalculator, PerformanceMetrics};
use crate::domain::optimizer::{
    GridSearchConfig, GridSearchOptimizer, GridSearchResult, ParameterSet, ParameterSpace,
    StrategyRunner,
};
use crate::domain::orchestrator::{AnnotatedCandle, IndicatorOrchestrator};
use crate::domain::portfolio::EquityPoint;
use crate::domain::signal::{Direction, Grade, ScreenerConfig, ScreenerEngine, ScreenerRunResult, SignalEvaluator};
use crate::domain::strategy::{
    OrderType, PositionSizing, StopLossKind, StopLossSpec, StrategyDefinition, TakeProfitKind,
    TakeProfitSpec, TradeFilters, apply_parameters,
};
use crate::domain::universe::{SkipReason, SkippedSymbol, load_universe, parse_symbols};
use crate::domain::walk_forward::{
    StrategyRangeRunner, WalkForwardAnalyzer, WalkForwardConfig, WalkForwardResult, WindowMode,
};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;

#[derive(Parser, Debug)]
#[command(name = "stratbench", about = "Strategy backtesting, optimization and screening")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(short, long)]
    pub config: PathBuf,
    /// Write JSON here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Emit gzip+base64 instead of plain JSON
    #[arg(long)]
    pub compress: bool,
    /// Override the configured symbol (comma list for `screen`)
    #[arg(long)]
    pub symbol: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a single backtest
    Backtest(RunArgs),
    /// Grid-search the [parameters] space
    Optimize(RunArgs),
    /// Rolling or anchored walk-forward analysis
    WalkForward(RunArgs),
    /// Screen a symbol universe for live entry signals
    Screen(RunArgs),
    /// Parse and validate a configuration without running it
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let outcome = match cli.command {
        Command::Backtest(args) => run_backtest_command(&args),
        Command::Optimize(args) => run_optimize(&args),
        Command::WalkForward(args) => run_walk_forward(&args),
        Command::Screen(args) => run_screen(&args),
        Command::Validate { config } => run_validate(&config),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, StratbenchError> {
    info!(path = %path.display(), "loading config");
    FileConfigAdapter::from_file(path)
}

fn invalid(section: &str, key: &str, reason: String) -> StratbenchError {
    StratbenchError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason,
    }
}

fn parsed<T>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<Option<T>, StratbenchError> {
    config
        .get_string(section, key)
        .map(|raw| parse(&raw).map_err(|reason| invalid(section, key, reason)))
        .transpose()
}

fn count(config: &dyn ConfigPort, section: &str, key: &str, default: usize) -> usize {
    usize::try_from(config.get_int(section, key, default as i64)).unwrap_or(default)
}

pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, StratbenchError> {
    let defaults = BacktestConfig::default();
    let date = |key: &str, default: NaiveDate| -> Result<NaiveDate, StratbenchError> {
        match config.get_string("backtest", key) {
            Some(s) => parse_date("backtest", key, &s),
            None => Ok(default),
        }
    };

    Ok(BacktestConfig {
        start_date: date("start_date", defaults.start_date)?,
        end_date: date("end_date", defaults.end_date)?,
        initial_capital: config.get_double("backtest", "initial_capital", defaults.initial_capital),
        commission_per_trade: config.get_double("backtest", "commission_per_trade", 0.0),
        commission_pct: config.get_double("backtest", "commission_pct", 0.0),
        slippage_pct: config.get_double("backtest", "slippage_pct", 0.0),
        risk_free_rate: config.get_double("backtest", "risk_free_rate", 0.0),
    })
}

/// `[indicators]` entries applied over the default periods.
fn indicator_overrides(config: &dyn ConfigPort) -> Result<ParameterSet, StratbenchError> {
    let mut set = ParameterSet::default();
    for key in config.keys("indicators") {
        if let Some(value) = optional_number(config, "indicators", &key)? {
            set.insert(key, value);
        }
    }
    Ok(set)
}

pub fn build_strategy(config: &dyn ConfigPort) -> Result<StrategyDefinition, StratbenchError> {
    const S: &str = "strategy";
    let defaults = StrategyDefinition::default();

    let stop_kind = parsed(config, S, "stop_loss", |s| s.parse::<StopLossKind>())?
        .unwrap_or(defaults.stop_loss.kind);
    let target_kind = config
        .get_string(S, "take_profit")
        .map(|s| TakeProfitKind::from_name(&s))
        .unwrap_or(defaults.take_profit.kind);

    let order_type = match config.get_string(S, "order_type") {
        Some(s) if s.trim().eq_ignore_ascii_case("limit") => OrderType::Limit {
            offset_percent: config.get_double(S, "limit_offset_pct", 1.0),
        },
        _ => OrderType::Market,
    };

    let sizing_defaults = PositionSizing::default();
    let strategy = StrategyDefinition {
        name: config.get_string(S, "name").unwrap_or_else(|| "unnamed".to_string()),
        description: config.get_string(S, "description").unwrap_or_default(),
        entry: parse_condition_lines(config, "entry")?,
        exit: parse_condition_lines(config, "exit")?,
        stop_loss: StopLossSpec {
            kind: stop_kind,
            multiplier: config.get_double(S, "stop_multiplier", defaults.stop_loss.multiplier),
        },
        take_profit: TakeProfitSpec {
            kind: target_kind,
            multiplier: config.get_double(S, "target_multiplier", defaults.take_profit.multiplier),
        },
        sizing: PositionSizing {
            risk_percent: config.get_double(S, "risk_percent", sizing_defaults.risk_percent),
            max_positions: count(config, S, "max_positions", sizing_defaults.max_positions),
            max_portfolio_heat_percent: config.get_double(
                S,
                "max_heat",
                sizing_defaults.max_portfolio_heat_percent,
            ),
            max_drawdown_percent: config.get_double(
                S,
                "max_drawdown",
                sizing_defaults.max_drawdown_percent,
            ),
            drawdown_recovery_percent: config.get_double(
                S,
                "drawdown_recovery",
                sizing_defaults.drawdown_recovery_percent,
            ),
        },
        filters: TradeFilters {
            min_price: optional_number(config, S, "min_price")?,
            max_price: optional_number(config, S, "max_price")?,
            min_volume: optional_number(config, S, "min_volume")?.map(|v| v as i64),
        },
        order_type,
        order_validity_bars: count(config, S, "order_validity_bars", 1).max(1),
        ..defaults
    };

    let strategy = apply_parameters(&strategy, &indicator_overrides(config)?)?;
    for warning in strategy.warnings() {
        warn!("{}", warning);
    }
    Ok(strategy)
}

pub fn build_parameter_space(config: &dyn ConfigPort) -> Result<ParameterSpace, StratbenchError> {
    Ok(ParameterSpace::new(parse_parameter_definitions(config)?))
}

pub fn build_grid_config(config: &dyn ConfigPort, backtest: &BacktestConfig) -> GridSearchConfig {
    let defaults = GridSearchConfig::default();
    GridSearchConfig {
        top_k: count(config, "optimize", "top_k", defaults.top_k).max(1),
        parallel: config.get_bool("optimize", "parallel", defaults.parallel),
        risk_free_rate: backtest.risk_free_rate,
    }
}

pub fn build_walk_forward_config(
    config: &dyn ConfigPort,
    backtest: &BacktestConfig,
) -> Result<WalkForwardConfig, StratbenchError> {
    let defaults = WalkForwardConfig::default();
    Ok(WalkForwardConfig {
        mode: parsed(config, "walk_forward", "mode", |s| s.parse::<WindowMode>())?
            .unwrap_or(defaults.mode),
        in_sample_bars: count(config, "walk_forward", "in_sample_bars", defaults.in_sample_bars),
        out_of_sample_bars: count(
            config,
            "walk_forward",
            "out_of_sample_bars",
            defaults.out_of_sample_bars,
        ),
        grid: build_grid_config(config, backtest),
    })
}

pub fn build_screener_config(
    config: &dyn ConfigPort,
) -> Result<(ScreenerConfig, SignalEvaluator), StratbenchError> {
    const S: &str = "screener";
    let defaults = ScreenerConfig::default();
    let screener = ScreenerConfig {
        direction: parsed(config, S, "direction", |s| s.parse::<Direction>())?
            .unwrap_or(defaults.direction),
        top_n: count(config, S, "top_n", defaults.top_n).max(1),
        min_grade: parsed(config, S, "min_grade", |s| s.parse::<Grade>())?
            .unwrap_or(defaults.min_grade),
    };

    let evaluator_defaults = SignalEvaluator::default();
    let evaluator = SignalEvaluator {
        volume_multiplier: config.get_double(S, "volume_multiplier", evaluator_defaults.volume_multiplier),
        lookback: count(config, S, "lookback", evaluator_defaults.lookback),
        ..evaluator_defaults
    };
    Ok((screener, evaluator))
}

fn resolve_symbol(config: &dyn ConfigPort, override_symbol: Option<&str>) -> Result<String, StratbenchError> {
    override_symbol
        .map(str::to_string)
        .or_else(|| config.get_string("backtest", "symbol"))
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StratbenchError::ConfigMissing {
            section: "backtest".into(),
            key: "symbol".into(),
        })
}

fn data_adapter(config: &dyn ConfigPort) -> Result<CsvAdapter, StratbenchError> {
    config
        .get_string("backtest", "data_dir")
        .map(|dir| CsvAdapter::new(PathBuf::from(dir.trim())))
        .ok_or_else(|| StratbenchError::ConfigMissing {
            section: "backtest".into(),
            key: "data_dir".into(),
        })
}

/// Load config, validate the sections every run needs, and build the shared
/// pieces.
fn prepare(
    args: &RunArgs,
) -> Result<(FileConfigAdapter, BacktestConfig, StrategyDefinition), StratbenchError> {
    let config = load_config(&args.config)?;
    validate_backtest_config(&config)?;
    validate_strategy_config(&config)?;
    let backtest = build_backtest_config(&config)?;
    let strategy = build_strategy(&config)?;
    eprintln!("Strategy: {}", strategy.name);
    Ok((config, backtest, strategy))
}

fn write_output<T: Serialize>(value: &T, args: &RunArgs) -> Result<(), StratbenchError> {
    let text = if args.compress {
        compress_json(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    match &args.output {
        Some(path) => {
            fs::write(path, text + "\n")?;
            eprintln!("Output written to: {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

/// Buy-and-hold curve scaled to `capital`.
fn benchmark_curve(bars: &[Candle], capital: f64) -> Vec<EquityPoint> {
    let Some(first) = bars.first().filter(|c| c.close > 0.0) else {
        return Vec::new();
    };
    bars.iter()
        .map(|c| EquityPoint {
            date: c.date,
            equity: capital * c.close / first.close,
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct BacktestReport<'a> {
    strategy: &'a str,
    symbol: &'a str,
    benchmark: Option<String>,
    metrics: PerformanceMetrics,
    result: BacktestEngineResult,
    warnings: Vec<String>,
}

fn print_metrics(metrics: &PerformanceMetrics) {
    eprintln!("\n=== Results ===");
    eprintln!("Total Return:     {:.2}%", metrics.total_return * 100.0);
    eprintln!("CAGR:             {:.2}%", metrics.cagr * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", metrics.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", metrics.sortino_ratio);
    eprintln!("Max Drawdown:     {:.1}%", metrics.max_drawdown * 100.0);
    eprintln!("Total Trades:     {}", metrics.total_trades);
    eprintln!("Win Rate:         {:.1}%", metrics.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", metrics.profit_factor);
    for flag in &metrics.red_flags {
        eprintln!("  red flag: {}", flag);
    }
}

fn run_backtest_command(args: &RunArgs) -> Result<(), StratbenchError> {
    let (config, backtest, strategy) = prepare(args)?;
    validate_data_source(&config, args.symbol.as_deref())?;
    let symbol = resolve_symbol(&config, args.symbol.as_deref())?;
    let data = data_adapter(&config)?;

    // Bars before start_date feed indicator warmup only.
    let series = data.load_series(&symbol, NaiveDate::MIN, backtest.end_date)?;
    eprintln!(
        "Running backtest on {} ({} daily bars loaded)",
        symbol,
        series.get(&Timeframe::Daily).map_or(0, Vec::len)
    );
    let result = run_backtest(&series, &strategy, &backtest)?;

    let mut warnings = strategy.warnings();
    warnings.extend(result.warnings.iter().cloned());

    let benchmark = config
        .get_string("backtest", "benchmark")
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty());
    let benchmark_bars = match &benchmark {
        Some(b) => match data.fetch_candles(b, Timeframe::Daily, backtest.start_date, backtest.end_date) {
            Ok(bars) => bars,
            Err(e) => {
                warn!(benchmark = %b, error = %e, "benchmark unavailable");
                warnings.push(format!("benchmark {} unavailable: {}", b, e));
                Vec::new()
            }
        },
        None => Vec::new(),
    };
    let curve = benchmark_curve(&benchmark_bars, backtest.initial_capital);

    let calculator = PerformanceCalculator::new(backtest.risk_free_rate);
    let metrics = calculator.calculate(
        &result.equity_curve,
        &result.trades,
        (!curve.is_empty()).then_some(curve.as_slice()),
    );
    print_metrics(&metrics);
    eprintln!("Rejected orders:  {}", result.rejections.len());

    write_output(
        &BacktestReport {
            strategy: &strategy.name,
            symbol: &symbol,
            benchmark,
            metrics,
            result,
            warnings,
        },
        args,
    )
}

fn run_optimize(args: &RunArgs) -> Result<(), StratbenchError> {
    let (config, backtest, strategy) = prepare(args)?;
    validate_optimize_config(&config)?;
    validate_data_source(&config, args.symbol.as_deref())?;
    let symbol = resolve_symbol(&config, args.symbol.as_deref())?;
    let series = data_adapter(&config)?.load_series(&symbol, NaiveDate::MIN, backtest.end_date)?;

    let space = build_parameter_space(&config)?;
    let grid = build_grid_config(&config, &backtest);
    eprintln!(
        "Optimizing {} on {}: {} combinations",
        strategy.name,
        symbol,
        space.total_combinations()
    );

    let runner = StrategyRunner {
        series: &series,
        strategy: &strategy,
        config: &backtest,
    };
    let result: GridSearchResult = GridSearchOptimizer::new(grid).run(&space, &runner);

    eprintln!(
        "\nCompleted {}/{} combinations ({} failed) in {} ms",
        result.completed_combinations,
        result.total_combinations,
        result.failed_combinations,
        result.elapsed_ms
    );
    match result.best() {
        Some(best) => eprintln!("Best: {} (Sharpe {:.2})", best.parameters, best.score),
        None => eprintln!("No combination completed"),
    }
    write_output(&result, args)
}

fn run_walk_forward(args: &RunArgs) -> Result<(), StratbenchError> {
    let (config, backtest, strategy) = prepare(args)?;
    validate_walk_forward_config(&config)?;
    validate_data_source(&config, args.symbol.as_deref())?;
    let symbol = resolve_symbol(&config, args.symbol.as_deref())?;
    let series = data_adapter(&config)?.load_series(&symbol, backtest.start_date, backtest.end_date)?;

    let space = build_parameter_space(&config)?;
    let wf_config = build_walk_forward_config(&config, &backtest)?;
    let runner = StrategyRangeRunner::new(&series, &strategy, &backtest);
    let result: WalkForwardResult = WalkForwardAnalyzer::new(wf_config).run(&space, &runner);

    eprintln!("\n=== Walk-Forward ({}) ===", result.mode);
    eprintln!("Windows:          {}", result.windows.len());
    eprintln!("Avg IS Sharpe:    {:.2}", result.average_in_sample_sharpe);
    eprintln!("Avg OOS Sharpe:   {:.2}", result.average_out_of_sample_sharpe);
    eprintln!("Avg Efficiency:   {:.2}", result.average_efficiency);
    match (&result.grade, &result.blessed_parameters) {
        (Some(grade), Some(params)) => {
            eprintln!("Overfitting:      {:.2} ({})", result.average_overfitting, grade);
            eprintln!("Blessed:          {}", params);
        }
        _ => eprintln!("No window completed"),
    }
    for warning in &result.warnings {
        eprintln!("  warning: {}", warning);
    }
    write_output(&result, args)
}

#[derive(Debug, Serialize)]
struct ScreenReport {
    result: ScreenerRunResult,
    skipped_symbols: Vec<SkippedSymbol>,
}

/// Fraction of winning trades from a backtest over the symbol's history.
/// `None` when the history produced no trades.
fn historical_win_rate(
    strategy: &StrategyDefinition,
    backtest: &BacktestConfig,
    bars: &[AnnotatedCandle],
) -> Option<f64> {
    let result = BacktestEngine::new(strategy, backtest).run(bars);
    if result.trades.is_empty() {
        return None;
    }
    let winners = result.trades.iter().filter(|t| t.is_winner()).count();
    Some(winners as f64 / result.trades.len() as f64)
}

/// Annotate every loaded symbol. A symbol whose indicators fail is
/// recorded in `skipped` and left out.
fn annotate_universe<F>(
    series: &BTreeMap<String, HashMap<Timeframe, Vec<Candle>>>,
    skipped: &mut Vec<SkippedSymbol>,
    annotate: F,
) -> HashMap<String, Vec<AnnotatedCandle>>
where
    F: Fn(&HashMap<Timeframe, Vec<Candle>>) -> Result<Vec<AnnotatedCandle>, IndicatorError>,
{
    let mut annotated = HashMap::new();
    for (symbol, timeframes) in series {
        match annotate(timeframes) {
            Ok(bars) => {
                annotated.insert(symbol.clone(), bars);
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "skipping symbol");
                skipped.push(SkippedSymbol {
                    symbol: symbol.clone(),
                    reason: SkipReason::Error(e.to_string()),
                });
            }
        }
    }
    annotated
}

fn run_screen(args: &RunArgs) -> Result<(), StratbenchError> {
    let (config, backtest, strategy) = prepare(args)?;
    validate_screener_config(&config)?;
    let symbols = match &args.symbol {
        Some(list) => parse_symbols(list)?,
        None => parse_symbols(&config.get_string("screener", "symbols").unwrap_or_default())?,
    };
    let (screener_config, evaluator) = build_screener_config(&config)?;
    let data = data_adapter(&config)?;

    let universe = load_universe(&data, symbols, backtest.start_date, backtest.end_date)?;
    let orchestrator = IndicatorOrchestrator::new(strategy.indicators.clone());
    let use_history = config.get_bool("screener", "history_win_rate", true);

    let mut skipped = universe.skipped;
    let annotated = annotate_universe(&universe.series, &mut skipped, |series| {
        orchestrator.annotate(series)
    });
    let mut win_rates: HashMap<String, f64> = HashMap::new();
    if use_history {
        for (symbol, bars) in &annotated {
            if let Some(rate) = historical_win_rate(&strategy, &backtest, bars) {
                win_rates.insert(symbol.clone(), rate);
            }
        }
    }

    let result = ScreenerEngine::new(&strategy, screener_config)
        .with_evaluator(evaluator)
        .scan(&annotated, &win_rates);

    eprintln!(
        "\nScanned {} symbols ({} skipped at load), {} candidates, {} signals",
        result.symbols_scanned,
        skipped.len(),
        result.candidates,
        result.signals.len()
    );
    for signal in &result.signals {
        eprintln!(
            "  {:<8} {} {:>6.1} entry {:.2} stop {:.2} target {:.2}",
            signal.symbol,
            signal.confidence.grade,
            signal.confidence.score,
            signal.entry_price,
            signal.stop_loss,
            signal.take_profit
        );
    }

    write_output(
        &ScreenReport {
            result,
            skipped_symbols: skipped,
        },
        args,
    )
}

fn run_validate(path: &Path) -> Result<(), StratbenchError> {
    let config = load_config(path)?;
    validate_backtest_config(&config)?;
    validate_strategy_config(&config)?;
    let strategy = build_strategy(&config)?;

    if config.has_section("walk_forward") {
        validate_walk_forward_config(&config)?;
    } else if config.has_section("parameters") || config.has_section("optimize") {
        validate_optimize_config(&config)?;
    }
    if config.has_section("screener") {
        validate_screener_config(&config)?;
    }

    eprintln!(
        "Strategy '{}' is valid: {} entry group(s), {} exit group(s), warmup {} bars",
        strategy.name,
        strategy.entry.len(),
        strategy.exit.len(),
        strategy.indicators.warmup_bars()
    );
    for warning in strategy.warnings() {
        eprintln!("  warning: {}", warning);
    }
    Ok(())
}
