//! Tests for batch accumulation and flushing.

use super::*;
use crate::config::{ClientConfig, Credentials};
use crate::queue::QueueClient;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EMPTY_BATCH_RESPONSE: &str =
    "<SendMessageBatchResponse><SendMessageBatchResult/></SendMessageBatchResponse>";

fn test_queue(server: &MockServer) -> Queue {
    let config = ClientConfig::new("us-east-1", Credentials::new("AKID", "SECRET"))
        .with_endpoint(server.uri());
    QueueClient::new(&config)
        .unwrap()
        .queue_from_url(&format!("{}/123456789012/jobs", server.uri()))
        .unwrap()
}

/// Number of entries carried by each recorded batch call, in order
async fn entries_per_call(server: &MockServer) -> Vec<usize> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| {
            String::from_utf8_lossy(&request.body)
                .matches(".MessageBody=")
                .count()
        })
        .collect()
}

#[tokio::test]
async fn test_twenty_three_items_flush_as_ten_ten_three() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("Action=SendMessageBatch"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_BATCH_RESPONSE))
        .expect(3)
        .mount(&server)
        .await;

    let queue = test_queue(&server);
    let mut batch = MessageBatch::new(&queue);
    for i in 0..23 {
        batch.push(format!("item-{}", i)).await.unwrap();
    }
    assert_eq!(batch.flushes(), 2);
    assert_eq!(batch.pending(), 3);

    batch.finish().await.unwrap();

    assert_eq!(entries_per_call(&server).await, vec![10, 10, 3]);
}

#[tokio::test]
async fn test_item_completing_a_group_is_flushed_with_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_BATCH_RESPONSE))
        .expect(1)
        .mount(&server)
        .await;

    let queue = test_queue(&server);
    let mut batch = MessageBatch::new(&queue);
    for i in 0..10 {
        batch.push(format!("item-{}", i)).await.unwrap();
    }
    assert_eq!(batch.pending(), 0);

    batch.finish().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body).into_owned();
    assert!(body.contains("SendMessageBatchRequestEntry.10.MessageBody=item-9"));
}

#[tokio::test]
async fn test_entry_ids_continue_across_flushes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_BATCH_RESPONSE))
        .mount(&server)
        .await;

    let queue = test_queue(&server);
    let mut batch = MessageBatch::new(&queue);
    for i in 0..12 {
        batch.push(format!("item-{}", i)).await.unwrap();
    }
    batch.finish().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let second = String::from_utf8_lossy(&requests[1].body).into_owned();
    assert!(second.contains("SendMessageBatchRequestEntry.1.Id=msg-10"));
    assert!(second.contains("SendMessageBatchRequestEntry.2.Id=msg-11"));
}

#[tokio::test]
async fn test_empty_batch_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_BATCH_RESPONSE))
        .expect(0)
        .mount(&server)
        .await;

    let queue = test_queue(&server);
    let result = MessageBatch::new(&queue).finish().await.unwrap();

    assert_eq!(result, BatchResult::default());
}

#[tokio::test]
async fn test_results_collect_successes_and_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<SendMessageBatchResponse><SendMessageBatchResult>\
             <SendMessageBatchResultEntry><Id>msg-0</Id><MessageId>m-0</MessageId>\
             <MD5OfMessageBody>abc</MD5OfMessageBody></SendMessageBatchResultEntry>\
             <BatchResultErrorEntry><Id>msg-1</Id><Code>InvalidMessageContents</Code>\
             <Message>bad body</Message><SenderFault>true</SenderFault></BatchResultErrorEntry>\
             </SendMessageBatchResult></SendMessageBatchResponse>",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let queue = test_queue(&server);
    let result = queue
        .post_messages(vec![serde_json::json!({"n": 0}), serde_json::json!({"n": 1})])
        .await
        .unwrap();

    assert!(!result.is_complete());
    assert_eq!(result.successful.len(), 1);
    assert_eq!(result.successful[0].id, "msg-0");
    assert_eq!(result.successful[0].sent.message_id, "m-0");
    assert_eq!(
        result.failed,
        vec![BatchFailure {
            id: "msg-1".to_string(),
            code: "InvalidMessageContents".to_string(),
            message: "bad body".to_string(),
            sender_fault: true,
        }]
    );
}

#[tokio::test]
async fn test_oversized_direct_batch_rejected() {
    let server = MockServer::start().await;
    let queue = test_queue(&server);
    let bodies: Vec<String> = (0..11).map(|i| i.to_string()).collect();

    let result = queue
        .client()
        .send_message_batch(queue.url(), &bodies, 0)
        .await;

    assert!(matches!(result, Err(QueueError::Validation(_))));
}

fn accepted_entries(ids: std::ops::Range<usize>) -> String {
    let entries: String = ids
        .map(|i| {
            format!(
                "<SendMessageBatchResultEntry><Id>msg-{i}</Id><MessageId>m-{i}</MessageId>\
                 <MD5OfMessageBody>abc</MD5OfMessageBody></SendMessageBatchResultEntry>"
            )
        })
        .collect();
    format!(
        "<SendMessageBatchResponse><SendMessageBatchResult>{}\
         </SendMessageBatchResult></SendMessageBatchResponse>",
        entries
    )
}

async fn mount_first_ok_then_rejected(server: &MockServer) {
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(accepted_entries(0..10)))
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            "<ErrorResponse><Error><Type>Sender</Type><Code>InvalidParameterValue</Code>\
             <Message>rejected</Message></Error></ErrorResponse>",
        ))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_failed_flush_keeps_bodies_and_earlier_results() {
    let server = MockServer::start().await;
    mount_first_ok_then_rejected(&server).await;

    let queue = test_queue(&server);
    let mut batch = MessageBatch::new(&queue);
    for i in 0..12 {
        batch.push(format!("item-{}", i)).await.unwrap();
    }

    let result = batch.finish().await;

    assert!(matches!(result, Err(QueueError::Action(_))));
    assert_eq!(batch.pending(), 2);
    assert_eq!(batch.flushes(), 1);
    assert_eq!(batch.result().successful.len(), 10);

    server.reset().await;
    Mock::given(method("POST"))
        .and(body_string_contains("SendMessageBatchRequestEntry.1.Id=msg-10"))
        .respond_with(ResponseTemplate::new(200).set_body_string(accepted_entries(10..12)))
        .expect(1)
        .mount(&server)
        .await;

    let result = batch.finish().await.unwrap();

    assert_eq!(batch.pending(), 0);
    assert_eq!(result.successful.len(), 12);
    assert_eq!(result.successful[11].id, "msg-11");
}

#[tokio::test]
async fn test_post_messages_failure_reports_partial_result() {
    let server = MockServer::start().await;
    mount_first_ok_then_rejected(&server).await;

    let queue = test_queue(&server);
    let objects: Vec<serde_json::Value> = (0..12).map(|n| serde_json::json!({ "n": n })).collect();

    let result = queue.post_messages(objects).await;

    match result {
        Err(QueueError::BatchInterrupted {
            delivered,
            unsent,
            source,
        }) => {
            assert_eq!(delivered.successful.len(), 10);
            assert_eq!(delivered.successful[0].sent.message_id, "m-0");
            assert_eq!(unsent, vec![r#"{"n":10}"#.to_string(), r#"{"n":11}"#.to_string()]);
            assert_eq!(source.service_code(), Some("InvalidParameterValue"));
        }
        other => panic!("Expected BatchInterrupted, got {:?}", other),
    }
}
