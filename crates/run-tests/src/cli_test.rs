//! Tests for argument parsing, config overrides and test selection

#[cfg(test)]
mod tests {
    use std::io::Write;

    use clap::Parser;
    use wmprobe::{suite, ReportFormat, TestStatus};

    use crate::cli::{select_tests, Cli};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("run-tests").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn defaults() {
        let cli = parse(&[]);
        assert!(cli.test.is_none());
        assert!(cli.timeout.is_none());
        assert_eq!(cli.format, ReportFormat::Text);
        assert!(!cli.headless);
        assert!(!cli.list);
    }

    #[test]
    fn equals_form_is_accepted() {
        let cli = parse(&["--test=reparent", "--timeout=7", "--format=json"]);
        assert_eq!(cli.test.as_deref(), Some("reparent"));
        assert_eq!(cli.timeout, Some(7));
        assert_eq!(cli.format, ReportFormat::Json);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let result = Cli::try_parse_from(["run-tests", "--format", "xml"]);
        assert!(result.is_err());
    }

    #[test]
    fn non_numeric_timeout_is_rejected() {
        let result = Cli::try_parse_from(["run-tests", "--timeout", "soon"]);
        assert!(result.is_err());
    }

    #[test]
    fn overrides_apply_to_config_file() {
        let mut file = std::env::temp_dir();
        file.push(format!("run-tests-cli-{}.toml", std::process::id()));
        {
            let mut f = std::fs::File::create(&file).unwrap();
            writeln!(f, "[manager]\nprogram = \"openbox\"\n\n[run]\ntimeout_secs = 9").unwrap();
        }

        let path = file.to_str().unwrap();
        let config = parse(&["--config", path]).config().unwrap();
        assert_eq!(config.manager.program, "openbox");
        assert_eq!(config.run.timeout_secs, 9);

        let config = parse(&["--config", path, "--timeout=3", "--wm", "metacity"])
            .config()
            .unwrap();
        assert_eq!(config.manager.program, "metacity");
        assert_eq!(config.run.timeout_secs, 3);

        std::fs::remove_file(&file).ok();
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let mut file = std::env::temp_dir();
        file.push(format!("run-tests-cli-zero-{}.toml", std::process::id()));
        std::fs::write(&file, "").unwrap();

        let result = parse(&["--config", file.to_str().unwrap(), "--timeout=0"]).config();
        assert!(result.is_err());

        std::fs::remove_file(&file).ok();
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let result = parse(&["--config", "/nonexistent/run-tests.toml"]).config();
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("/nonexistent/run-tests.toml"), "got: {}", message);
    }

    #[test]
    fn select_all_by_default() {
        let tests = suite::builtin();
        assert_eq!(select_tests(&tests, None).unwrap().len(), tests.len());
    }

    #[test]
    fn select_single_test() {
        let tests = suite::builtin();
        let selected = select_tests(&tests, Some("reparent")).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name(), "reparent");
    }

    #[test]
    fn unknown_test_name_lists_available() {
        let tests = suite::builtin();
        let message = select_tests(&tests, Some("nope")).unwrap_err().to_string();
        assert!(message.contains("unknown test 'nope'"));
        assert!(message.contains("reparent"));
    }

    #[test]
    fn headless_runner_runs_builtin_suite() {
        let mut file = std::env::temp_dir();
        file.push(format!("run-tests-cli-headless-{}.toml", std::process::id()));
        std::fs::write(&file, "[poll]\ninitial_interval_ms = 1\nmax_interval_ms = 20\n").unwrap();

        let cli = parse(&["--headless", "--config", file.to_str().unwrap()]);
        let config = cli.config().unwrap();
        let results: Vec<_> = cli.runner(&config).run(&suite::builtin()).collect();

        assert!(results.iter().all(|r| r.status == TestStatus::Pass), "{:?}", results);
        std::fs::remove_file(&file).ok();
    }
}
