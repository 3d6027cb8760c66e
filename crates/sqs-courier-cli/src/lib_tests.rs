//! Tests for the sqs-courier-cli library module.

use super::*;
use sqs_courier::{Credentials, RetryPolicy};
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(server: &MockServer) -> QueueClient {
    let config = ClientConfig::new("us-east-1", Credentials::new("AKID", "SECRET"))
        .with_endpoint(server.uri());
    QueueClient::new(&config).unwrap()
}

async fn run(server: &MockServer, args: &[&str]) -> Result<String, CliError> {
    let cli = Cli::try_parse_from(args).unwrap();
    let mut out = Vec::new();
    execute_command(cli.command, &test_client(server), &mut out).await?;
    Ok(String::from_utf8(out).unwrap())
}

mod parsing_tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["sqs-courier", "--json-logs", "send", "jobs", "hi", "-d", "5"])
            .unwrap();

        assert!(cli.json_logs);
        assert_eq!(cli.log_level, "info");
        match cli.command {
            Commands::Send { queue, body, delay } => {
                assert_eq!(queue, "jobs");
                assert_eq!(body, "hi");
                assert_eq!(delay, Some(5));
            }
            other => panic!("Expected Send command, got {:?}", other),
        }
    }

    #[test]
    fn test_listen_requires_a_queue() {
        assert!(Cli::try_parse_from(["sqs-courier", "listen"]).is_err());

        let cli = Cli::try_parse_from(["sqs-courier", "listen", "a", "b"]).unwrap();
        match cli.command {
            Commands::Listen { queues, poll_time } => {
                assert_eq!(queues, vec!["a".to_string(), "b".to_string()]);
                assert_eq!(poll_time, 5);
            }
            other => panic!("Expected Listen command, got {:?}", other),
        }
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            CliError::Configuration(ConfigurationError::Missing {
                key: "region".to_string(),
            }),
            CliError::QueueNotFound {
                name: "jobs".to_string(),
            },
            CliError::InvalidArgument {
                arg: "log-level".to_string(),
                message: "bad".to_string(),
            },
            CliError::Logging {
                message: "already set".to_string(),
            },
        ];

        let codes: Vec<i32> = errors.iter().map(CliError::exit_code).collect();
        assert_eq!(codes, vec![1, 3, 4, 6]);
    }

    #[test]
    fn test_client_configuration_error_exits_with_configuration_code() {
        let config = ClientConfig::new("us-east-1", Credentials::new("AKID", "SECRET"))
            .with_retry_policy(RetryPolicy::new(6, std::time::Duration::ZERO));

        let error = CliError::from(QueueClient::new(&config).unwrap_err());

        assert!(matches!(error, CliError::Configuration(_)));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_other_queue_errors_exit_with_queue_code() {
        let error = CliError::from(QueueError::QueueNotFound {
            queue: "jobs".to_string(),
        });

        assert_eq!(error.exit_code(), 2);
    }
}

mod command_tests {
    use super::*;

    #[tokio::test]
    async fn test_queues_lists_names_and_urls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=ListQueues"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<ListQueuesResponse><ListQueuesResult>\
                 <QueueUrl>https://sqs.us-east-1.amazonaws.com/1/jobs</QueueUrl>\
                 </ListQueuesResult></ListQueuesResponse>",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let output = run(&server, &["sqs-courier", "queues"]).await.unwrap();

        assert_eq!(output, "jobs\thttps://sqs.us-east-1.amazonaws.com/1/jobs\n");
    }

    #[tokio::test]
    async fn test_send_to_queue_url_prints_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=SendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<SendMessageResponse><SendMessageResult>\
                 <MD5OfMessageBody>5d41402abc4b2a76b9719d911017c592</MD5OfMessageBody>\
                 <MessageId>id-1</MessageId></SendMessageResult></SendMessageResponse>",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/1/jobs", server.uri());
        let output = run(&server, &["sqs-courier", "send", &url, "hello"])
            .await
            .unwrap();

        assert_eq!(output, "id-1\n");
    }

    #[tokio::test]
    async fn test_unknown_queue_name_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=GetQueueUrl"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                "<ErrorResponse><Error><Type>Sender</Type>\
                 <Code>AWS.SimpleQueueService.NonExistentQueue</Code>\
                 <Message>missing</Message></Error></ErrorResponse>",
            ))
            .mount(&server)
            .await;

        let result = run(&server, &["sqs-courier", "send", "jobs", "hello"]).await;

        match result {
            Err(e @ CliError::QueueNotFound { .. }) => assert_eq!(e.exit_code(), 3),
            other => panic!("Expected QueueNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attributes_printed_sorted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("AttributeName.1=All"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<GetQueueAttributesResponse><GetQueueAttributesResult>\
                 <Attribute><Name>VisibilityTimeout</Name><Value>30</Value></Attribute>\
                 <Attribute><Name>ApproximateNumberOfMessages</Name><Value>4</Value></Attribute>\
                 </GetQueueAttributesResult></GetQueueAttributesResponse>",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/1/jobs", server.uri());
        let output = run(&server, &["sqs-courier", "attributes", &url]).await.unwrap();

        assert_eq!(output, "ApproximateNumberOfMessages=4\nVisibilityTimeout=30\n");
    }
}
