use airdefsim::catalog::ReferenceCatalog;
use airdefsim::logging::{init_logging, level_for_verbosity, parse_log_level, LogConfig, LogOutput};
use airdefsim::runtime::{spawn_engine, RuntimeOptions};
use airdefsim::scenario::ScenarioConfig;
use airdefsim::simulation::Engine;
use airdefsim::telemetry::TracingSink;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::str::FromStr;
use tracing::{info, Level};

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("airdefsim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("多層防空シミュレーション (Air Defense Simulation)")
        .long_about(
            "探知・判断・迎撃エンジン\n\
             固定ティックの時間駆動で、脅威の探知・中継・脅威評価・迎撃・電子妨害を模擬します。",
        )
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定"),
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了"),
        )
        .arg(
            Arg::new("catalog")
                .short('c')
                .long("catalog")
                .value_name("FILE")
                .help("参照カタログ(.yaml)でシナリオ内のカタログを置き換える"),
        )
        .arg(
            Arg::new("realtime")
                .short('r')
                .long("realtime")
                .action(ArgAction::SetTrue)
                .help("ティック周期に合わせて実時間で実行"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("詳細出力レベル (-v: 進行状況, -vv: デバッグ, -vvv: トレース)"),
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("TARGET")
                .value_parser(LogOutput::from_str)
                .default_value("console")
                .help("ログ出力先 (console, file, both)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(parse_log_level)
                .help("ログレベル (trace, debug, info, warn, error)。未指定時は -v から決定"),
        )
        .get_matches();

    println!("多層防空シミュレーション - airdefsim v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let verbose_level = matches.get_count("verbose");
    let _guard = match init_logging(log_config(&matches, verbose_level)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
    };

    let Some(scenario_path) = matches.get_one::<String>("scenario") else {
        show_default_help();
        return;
    };

    let options = RunOptions {
        info_only: matches.get_flag("info"),
        catalog: matches.get_one::<String>("catalog").cloned(),
        realtime: matches.get_flag("realtime"),
        verbose_level,
    };

    if let Err(e) = run_scenario(scenario_path, &options) {
        eprintln!("エラー: {}", e);
        std::process::exit(1);
    }
    if verbose_level > 0 {
        println!("シナリオ実行が正常に完了しました。");
    }
}

struct RunOptions {
    info_only: bool,
    catalog: Option<String>,
    realtime: bool,
    verbose_level: u8,
}

fn log_config(matches: &ArgMatches, verbose_level: u8) -> LogConfig {
    let level = matches
        .get_one::<Level>("log-level")
        .copied()
        .unwrap_or_else(|| level_for_verbosity(verbose_level));
    let output = matches.get_one::<LogOutput>("log-output").copied().unwrap_or(LogOutput::Console);
    LogConfig {
        level,
        output,
        ..LogConfig::default()
    }
}

/// シナリオファイルを読み込んで実行
fn run_scenario(scenario_path: &str, options: &RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut scenario = ScenarioConfig::read(scenario_path)?;
    if let Some(catalog_path) = &options.catalog {
        scenario.catalog = ReferenceCatalog::from_file(catalog_path)?;
        info!(path = %catalog_path, "CATALOG_LOADED: 参照カタログを読み込みました");
    }
    scenario.validate()?;

    if options.verbose_level > 0 {
        println!("シナリオファイル読み込み完了: {}", scenario_path);
    }

    scenario.print_summary();
    println!();
    if options.info_only {
        return Ok(());
    }

    let mut engine = Engine::from_scenario(&scenario)?;
    engine.verbose_level = options.verbose_level;
    engine.set_sink(Box::new(TracingSink));

    let engine = if options.realtime {
        run_realtime(engine)?
    } else {
        engine.run();
        engine
    };

    println!();
    engine.print_summary();
    Ok(())
}

/// tokio ランタイム上で実時間実行
fn run_realtime(engine: Engine) -> Result<Engine, Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let engine = runtime.block_on(async move {
        let options = RuntimeOptions::for_engine(&engine).stop_at_duration(true);
        spawn_engine(engine, options).join().await
    })?;
    Ok(engine)
}

/// デフォルトヘルプを表示
fn show_default_help() {
    println!("使用方法:");
    println!("  airdefsim [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>     シナリオファイルを指定して実行");
    println!("  -i, --info                シナリオ情報のみ表示");
    println!("  -c, --catalog <FILE>      参照カタログを差し替え");
    println!("  -r, --realtime            実時間で実行");
    println!("  -v, --verbose             詳細出力 (複数指定で詳細レベル上昇)");
    println!("      --log-output <TARGET> ログ出力先 (console, file, both)");
    println!("      --log-level <LEVEL>   ログレベル");
    println!("  -h, --help                このヘルプを表示");
    println!();
    println!("利用可能なシナリオファイル:");
    println!("  scenarios/layered_defense.yaml  - 二拠点の多層防空シナリオ");
    println!("  scenarios/catalog.yaml          - 参照カタログ");
    println!();
    println!("例:");
    println!("  airdefsim -s scenarios/layered_defense.yaml");
    println!("  airdefsim -s scenarios/layered_defense.yaml -v --log-output both");
    println!("  airdefsim -s scenarios/layered_defense.yaml -c scenarios/catalog.yaml -i");
}
