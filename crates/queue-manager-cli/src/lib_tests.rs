//! Tests for the queue-manager-cli library module.

use super::*;
use queue_manager::{InMemoryQueueService, PollerConfig};
use std::sync::Arc;

fn client(config: QueueManagerConfig) -> QueueClient {
    QueueClient::new(Arc::new(InMemoryQueueService::default()), config).unwrap()
}

async fn run(client: &QueueClient, args: &[&str]) -> Result<String, CliError> {
    let mut argv = vec!["queue-manager"];
    argv.extend_from_slice(args);
    let cli = Cli::try_parse_from(argv).unwrap();

    let mut out = Vec::new();
    execute_command(cli.command, client, CancellationToken::new(), &mut out).await?;
    Ok(String::from_utf8(out).unwrap())
}

mod parsing {
    use super::*;

    #[test]
    fn test_send_parsing() {
        let cli = Cli::try_parse_from([
            "queue-manager",
            "--queue",
            "orders.fifo",
            "send",
            "hello",
            "--group",
            "customer-1",
            "--deduplication-id",
            "order-7",
        ])
        .unwrap();

        assert_eq!(cli.queue.as_deref(), Some("orders.fifo"));
        assert_eq!(
            cli.command,
            Commands::Send {
                body: "hello".to_string(),
                delay: None,
                group: Some("customer-1".to_string()),
                deduplication_id: Some("order-7".to_string()),
            }
        );
    }

    #[test]
    fn test_receive_defaults() {
        let cli = Cli::try_parse_from(["queue-manager", "receive"]).unwrap();

        assert_eq!(cli.log_level, "info");
        assert!(!cli.json_logs);
        assert_eq!(
            cli.command,
            Commands::Receive {
                max_messages: 1,
                delete: false,
                format: OutputFormat::Text,
            }
        );
    }

    #[test]
    fn test_poll_parsing() {
        let cli = Cli::try_parse_from([
            "queue-manager",
            "poll",
            "--wait-time",
            "20",
            "-n",
            "5",
            "--skip-delete",
            "--format",
            "json",
        ])
        .unwrap();

        match cli.command {
            Commands::Poll {
                wait_time,
                max_messages,
                skip_delete,
                limit,
                format,
            } => {
                assert_eq!(wait_time, Some(20));
                assert_eq!(max_messages, Some(5));
                assert!(skip_delete);
                assert_eq!(limit, None);
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("Expected Poll command, got: {:?}", other),
        }
    }

    #[test]
    fn test_missing_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["queue-manager", "--queue", "orders"]).is_err());
    }
}

mod configuration {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_command_line_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "queue_name = \"from-file\"\nvisibility_timeout = 30\n\n[sqs]\nregion = \"eu-west-1\""
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::try_parse_from([
            "queue-manager",
            "--config",
            path.as_str(),
            "--queue",
            "orders",
            "--endpoint-url",
            "http://localhost:4566",
            "counts",
        ])
        .unwrap();

        let config = build_config(&cli).unwrap();

        assert_eq!(config.queue_name, "orders");
        assert_eq!(config.visibility_timeout, 30);
        assert_eq!(config.sqs.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.sqs.endpoint_url.as_deref(), Some("http://localhost:4566"));
    }

    #[test]
    fn test_fifo_name_selects_fifo_mode() {
        let cli = Cli::try_parse_from(["queue-manager", "--queue", "jobs.fifo", "counts"]).unwrap();

        let config = build_config(&cli).unwrap();

        assert_eq!(config.queue_mode, QueueMode::Fifo);
    }

    #[test]
    fn test_invalid_override_is_a_configuration_error() {
        let cli = Cli::try_parse_from([
            "queue-manager",
            "--queue",
            "orders",
            "--visibility-timeout",
            "50000",
            "counts",
        ])
        .unwrap();

        let err = build_config(&cli).unwrap_err();

        assert!(matches!(err, CliError::Queue(QueueError::Configuration(_))));
        assert_eq!(err.exit_code(), 1);
    }
}

mod commands {
    use super::*;

    #[tokio::test]
    async fn test_send_then_receive_with_delete() {
        let client = client(QueueManagerConfig::new("orders"));

        let sent = run(&client, &["send", "hello"]).await.unwrap();
        let received = run(&client, &["receive", "--delete"]).await.unwrap();

        let fields: Vec<&str> = received.trim_end().split('\t').collect();
        assert_eq!(fields[0], sent.trim_end());
        assert_eq!(fields[2], "hello");
        assert_eq!(client.queue_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_receive_json_output() {
        let client = client(QueueManagerConfig::new("orders"));
        client.send("{\"id\":1}").await.unwrap();

        let output = run(&client, &["receive", "--format", "json"]).await.unwrap();

        let value: serde_json::Value = serde_json::from_str(output.trim_end()).unwrap();
        assert_eq!(value["body"], "{\"id\":1}");
        assert!(value["receipt_handle"].is_string());
    }

    #[tokio::test]
    async fn test_delete_by_receipt() {
        let client = client(QueueManagerConfig::new("orders"));
        client.send("x").await.unwrap();
        let message = client.receive().await.unwrap().remove(0);
        let receipt = message.receipt_handle.as_str().to_string();

        let first = run(&client, &["delete", receipt.as_str()]).await.unwrap();
        let second = run(&client, &["delete", receipt.as_str()]).await.unwrap();

        assert_eq!(first, "deleted\n");
        assert_eq!(second, "not found\n");
    }

    #[tokio::test]
    async fn test_destructive_commands_need_confirmation() {
        let client = client(QueueManagerConfig::new("orders"));
        client.send("x").await.unwrap();

        let err = run(&client, &["purge"]).await.unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument { .. }));
        assert_eq!(err.exit_code(), 4);
        assert_eq!(client.queue_size().await.unwrap(), 1);

        run(&client, &["purge", "--yes"]).await.unwrap();
        assert_eq!(client.queue_size().await.unwrap(), 0);

        assert!(run(&client, &["delete-queue"]).await.is_err());
        let output = run(&client, &["delete-queue", "--yes"]).await.unwrap();
        assert_eq!(output, "deleted queue orders\n");
    }

    #[tokio::test]
    async fn test_counts_output() {
        let client = client(QueueManagerConfig::new("orders"));
        client.send("a").await.unwrap();
        client.send("b").await.unwrap();
        client.receive().await.unwrap();

        let text = run(&client, &["counts"]).await.unwrap();
        assert!(text.contains("visible:   1"));
        assert!(text.contains("in_flight: 1"));
        assert!(text.contains("total:     2"));

        let json = run(&client, &["counts", "--format", "json"]).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(json.trim_end()).unwrap();
        assert_eq!(value["total"], 2);
        assert_eq!(value["delayed"], 0);
    }

    #[tokio::test]
    async fn test_fifo_send_prints_sequence_number() {
        let client = client(
            QueueManagerConfig::new("jobs.fifo").with_queue_mode(QueueMode::Fifo),
        );

        let output = run(&client, &["send", "x", "--group", "g1"]).await.unwrap();

        assert_eq!(output.trim_end().split('\t').count(), 2);
    }

    #[tokio::test]
    async fn test_fifo_send_without_group_is_rejected() {
        let client = client(
            QueueManagerConfig::new("jobs.fifo").with_queue_mode(QueueMode::Fifo),
        );

        let err = run(&client, &["send", "x"]).await.unwrap_err();

        // Missing message group is caught before any service call
        assert!(matches!(err, CliError::Queue(QueueError::Validation(_))));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_at_limit_and_deletes() {
        let client = client(
            QueueManagerConfig::new("orders")
                .with_poller(PollerConfig::default().with_wait_time(1)),
        );
        for body in ["one", "two", "three"] {
            client.send(body).await.unwrap();
        }

        let output = run(&client, &["poll", "--limit", "2", "-n", "1"]).await.unwrap();

        assert_eq!(output.lines().count(), 2);
        assert!(output.contains("\tone"));
        assert!(output.contains("\ttwo"));
        let counts = client.counts().await.unwrap();
        assert_eq!(counts.visible, 1);
        assert_eq!(counts.total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_limit_never_takes_more_than_it_prints() {
        let client = client(QueueManagerConfig::new("orders"));
        for body in ["one", "two", "three"] {
            client.send(body).await.unwrap();
        }

        // Default batch size is 10; only one message may be consumed
        let output = run(&client, &["poll", "--limit", "1"]).await.unwrap();

        let printed = output.lines().count() as u64;
        let counts = client.counts().await.unwrap();
        assert_eq!(printed, 1);
        assert_eq!(printed + counts.total(), 3);
        assert_eq!(counts.in_flight, 0);
    }

    struct ClosedOutput;

    impl Write for ClosedOutput {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_keeps_messages_it_could_not_print() {
        let client = client(QueueManagerConfig::new("orders"));
        client.send("one").await.unwrap();
        let cli = Cli::try_parse_from(["queue-manager", "poll", "--wait-time", "1"]).unwrap();

        let err = execute_command(cli.command, &client, CancellationToken::new(), &mut ClosedOutput)
            .await
            .unwrap_err();

        assert!(matches!(err, CliError::Io(_)));
        assert_eq!(err.exit_code(), 5);
        assert_eq!(client.queue_size().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_on_cancellation() {
        let client = client(QueueManagerConfig::new("orders"));
        client.send("only").await.unwrap();

        let cli = Cli::try_parse_from(["queue-manager", "poll", "--wait-time", "1", "--skip-delete"])
            .unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let mut out = Vec::new();
        execute_command(cli.command, &client, cancel, &mut out)
            .await
            .unwrap();

        let output = String::from_utf8(out).unwrap();
        assert_eq!(output.lines().count(), 1);
        // skip-delete leaves the message in flight
        assert_eq!(client.in_flight_size().await.unwrap(), 1);
    }
}
