//! Staking Escrow CLI
//!
//! Validates deployment parameters, simulates a network period by period and
//! inspects ledger snapshots.

use anyhow::Context;
use clap::{Parser, Subcommand};
use escrow_core::{AccountId, CallContext, ManualClock, TokenAmount};
use escrow_ledger::{
    Authorities, Collaborators, EscrowConfig, EscrowEvent, EscrowSnapshot, InMemoryToken, Issuer,
    NoopFeeLedger, StakingEscrow, TokenCustody, ONE_TOKEN,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "escrow")]
#[command(version)]
#[command(about = "Staking escrow ledger - issuance, commitments and slashing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration and print the derived issuance figures
    Params {
        /// Configuration file path (defaults are used when omitted)
        #[arg(short, long, env = "ESCROW_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Simulate stakers committing period after period
    Simulate {
        /// Configuration file path (defaults are used when omitted)
        #[arg(short, long, env = "ESCROW_CONFIG")]
        config: Option<PathBuf>,

        /// Number of stakers
        #[arg(short, long, default_value = "4")]
        stakers: u32,

        /// Number of periods to run
        #[arg(short, long, default_value = "12")]
        periods: u32,

        /// Lock duration of every stake (defaults to the simulated periods)
        #[arg(long)]
        lock_periods: Option<u32>,

        /// Wind down every stake
        #[arg(long)]
        wind_down: bool,

        /// Write the final ledger snapshot here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a summary of a snapshot file
    Inspect {
        /// Snapshot file
        snapshot: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false),
        )
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EscrowConfig> {
    match path {
        Some(path) => EscrowConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display())),
        None => {
            let config = EscrowConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Whole tokens with three decimals
fn display_tokens(amount: TokenAmount) -> String {
    let whole = amount / ONE_TOKEN;
    let milli = (amount % ONE_TOKEN) / (ONE_TOKEN / 1_000);
    format!("{whole}.{milli:03}")
}

fn params(config: &EscrowConfig) -> anyhow::Result<()> {
    let mut issuer = Issuer::new(config.issuance_params(), config.total_supply())?;
    issuer.initialize(config.reserved_reward(), 0)?;
    let issuance = issuer.params();
    let staking = config.staking_params();
    let adjudicator = config.adjudicator_params();

    // amounts exceed u64, so they are reported as strings
    let report = serde_json::json!({
        "seconds_per_period": config.period.seconds_per_period,
        "genesis_seconds_per_period": config.period.genesis_seconds_per_period,
        "total_supply": issuer.total_supply().to_string(),
        "reserved_reward": issuer.reserved_reward().to_string(),
        "minting_coefficient": issuer.minting_coefficient().to_string(),
        "phase": format!("{:?}", issuer.phase()),
        "max_period_reward": issuer.max_period_reward().to_string(),
        "issuance": {
            "issuance_decay_coefficient": issuance.issuance_decay_coefficient.to_string(),
            "lock_duration_coefficient_1": issuance.lock_duration_coefficient_1.to_string(),
            "lock_duration_coefficient_2": issuance.lock_duration_coefficient_2.to_string(),
            "maximum_rewarded_periods": issuance.maximum_rewarded_periods,
            "first_phase_total_supply": issuance.first_phase_total_supply.to_string(),
            "first_phase_max_issuance": issuance.first_phase_max_issuance.to_string(),
        },
        "staking": {
            "min_locked_periods": staking.min_locked_periods,
            "min_allowable_locked_tokens": staking.min_allowable_locked_tokens.to_string(),
            "max_allowable_locked_tokens": staking.max_allowable_locked_tokens.to_string(),
            "min_worker_periods": staking.min_worker_periods,
        },
        "adjudicator": {
            "base_penalty": adjudicator.base_penalty.to_string(),
            "penalty_history_coefficient": adjudicator.penalty_history_coefficient.to_string(),
            "percentage_penalty_coefficient": adjudicator.percentage_penalty_coefficient.to_string(),
            "reward_coefficient": adjudicator.reward_coefficient.to_string(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

struct SimulationOptions {
    stakers: u32,
    periods: u32,
    lock_periods: Option<u32>,
    wind_down: bool,
    output: Option<PathBuf>,
}

fn simulate(config: &EscrowConfig, options: SimulationOptions) -> anyhow::Result<()> {
    let spp = u64::from(config.period.seconds_per_period);
    let clock = Arc::new(ManualClock::new(spp));
    let owner = AccountId::from_label("owner");
    let authorities = Authorities {
        owner,
        custody: AccountId::from_label("escrow"),
        adjudicator: AccountId::from_label("adjudicator"),
        work_lock: None,
    };
    let token = Arc::new(InMemoryToken::new(owner, config.total_supply()));
    let collaborators = Collaborators::new(token.clone(), Arc::new(NoopFeeLedger));
    let mut escrow = StakingEscrow::from_config(config, clock.clone(), authorities, collaborators)?;
    escrow.initialize(owner, config.reserved_reward(), owner)?;

    let staking = *escrow.params();
    let lock_periods = options
        .lock_periods
        .unwrap_or(options.periods)
        .max(staking.min_locked_periods);
    let mut workers = Vec::new();
    for i in 0..options.stakers {
        let staker = AccountId::from_label(&format!("staker-{i}"));
        let worker = AccountId::from_label(&format!("worker-{i}"));
        let value = staking
            .min_allowable_locked_tokens
            .saturating_mul(TokenAmount::from(1 + i % 4))
            .min(staking.max_allowable_locked_tokens);
        token.transfer(owner, staker, value)?;
        escrow.deposit(staker, staker, value, lock_periods)?;
        escrow.bond_worker(staker, Some(worker))?;
        if options.wind_down {
            escrow.set_wind_down(staker, true)?;
        }
        workers.push(worker);
    }
    escrow.drain_events();

    println!("{:>8} {:>10} {:>24} {:>24}", "period", "committed", "minted", "reserve");
    for _ in 0..options.periods {
        let period = escrow.current_period();
        let mut committed = 0;
        for worker in &workers {
            match escrow.commit(CallContext::direct(*worker)) {
                Ok(()) => committed += 1,
                Err(err) => tracing::debug!(%worker, period, %err, "Commitment skipped"),
            }
        }
        let minted: TokenAmount = escrow
            .drain_events()
            .iter()
            .filter_map(|event| match event {
                EscrowEvent::Minted { value, .. } => Some(*value),
                _ => None,
            })
            .sum();
        println!(
            "{:>8} {:>10} {:>24} {:>24}",
            period,
            committed,
            display_tokens(minted),
            display_tokens(escrow.reserved_reward())
        );
        escrow.check_invariants()?;
        clock.advance(spp);
    }

    if let Some(output) = options.output {
        escrow.snapshot().save(&output)?;
        tracing::info!("Snapshot written to {:?}", output);
    }
    Ok(())
}

fn inspect(path: &Path) -> anyhow::Result<()> {
    let snapshot = EscrowSnapshot::load(path)?;
    let reserved = snapshot
        .total_supply
        .saturating_sub(snapshot.issuer.current_period_supply);

    println!("Snapshot: {:?}", path);
    println!("Version: {}", snapshot.version);
    println!("Period length: {}s", snapshot.seconds_per_period);
    println!("Taken at period: {}", snapshot.taken_at_period);
    println!("Stakers: {}", snapshot.stakers.len());
    println!("Total staked: {}", display_tokens(snapshot.total_staked()));
    println!("Reserved reward: {}", display_tokens(reserved));
    println!();
    println!("Locked per period:");
    for (period, total) in &snapshot.locked_per_period {
        println!("  {:>8} {:>24}", period, display_tokens(*total));
    }
    println!();
    println!("Stakers:");
    for (staker, info) in &snapshot.stakers {
        let worker = info
            .worker
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} value={} sub_stakes={} worker={} migrated={}",
            staker,
            display_tokens(info.value),
            info.sub_stakes.len(),
            worker,
            info.flags.migrated
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Params { config } => {
            let config = load_config(config.as_deref())?;
            params(&config)?;
        }

        Commands::Simulate {
            config,
            stakers,
            periods,
            lock_periods,
            wind_down,
            output,
        } => {
            let config = load_config(config.as_deref())?;
            tracing::info!(stakers, periods, "Starting simulation");
            simulate(
                &config,
                SimulationOptions {
                    stakers,
                    periods,
                    lock_periods,
                    wind_down,
                    output,
                },
            )?;
        }

        Commands::Inspect { snapshot } => {
            inspect(&snapshot)?;
        }
    }

    Ok(())
}
