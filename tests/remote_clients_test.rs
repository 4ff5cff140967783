use persona_chat::embedding::{Embedder, HfEmbedder};
use persona_chat::index::build_index;
use persona_chat::llm_interaction::{ChatModel, Generator, GroqClient};
use persona_chat::profile::Profile;
use persona_chat::ChatError;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EMBED_PATH: &str = "/models/sentence-transformers/all-MiniLM-L6-v2/pipeline/feature-extraction";

fn unit_vector(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; 384];
    v[axis] = 1.0;
    v
}

#[test_log::test(tokio::test)]
async fn generate_sends_model_prompt_and_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer gsk-test"))
        .and(body_partial_json(json!({
            "model": "mixtral-8x7b-32768",
            "messages": [{ "role": "user", "content": "Who is Alice?" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "model": "mixtral-8x7b-32768",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "  Alice is an engineer.\n" },
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GroqClient::with_base_url(server.uri(), "gsk-test".to_string());
    let answer = client
        .generate(ChatModel::Mixtral8x7b, "Who is Alice?")
        .await
        .unwrap();

    assert_eq!(answer, "Alice is an engineer.");
}

#[test_log::test(tokio::test)]
async fn generate_maps_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let client = GroqClient::with_base_url(server.uri(), "bad".to_string());
    let err = client
        .generate(ChatModel::default(), "hello")
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::Generation(_)));
    assert!(err.to_string().contains("401"));
    assert!(err.to_string().contains("invalid api key"));
}

#[tokio::test]
async fn generate_falls_back_when_no_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let client = GroqClient::with_base_url(server.uri(), "gsk".to_string());
    let answer = client.generate(ChatModel::Gemma2_9b, "hello").await.unwrap();

    assert_eq!(answer, "I don't have that information.");
}

#[tokio::test]
async fn generate_reports_unreachable_host() {
    // Nothing listens on the discard port.
    let client = GroqClient::with_base_url("http://127.0.0.1:9".to_string(), "gsk".to_string());
    let err = client.generate(ChatModel::default(), "hello").await.unwrap_err();
    assert!(matches!(err, ChatError::Generation(_)));
}

#[tokio::test]
async fn embed_sends_token_and_parses_vectors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .and(header("authorization", "Bearer hf-test"))
        .and(body_partial_json(json!({ "inputs": ["where does she live?"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([unit_vector(7)])))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = HfEmbedder::with_base_url(server.uri(), "hf-test".to_string());
    let vector = embedder.embed("where does she live?").await.unwrap();

    assert_eq!(vector.len(), 384);
    assert_eq!(vector[7], 1.0);
}

#[tokio::test]
async fn embed_rejects_wrong_dimension() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[0.1, 0.2, 0.3]])))
        .mount(&server)
        .await;

    let embedder = HfEmbedder::with_base_url(server.uri(), "hf".to_string());
    let err = embedder.embed("hello").await.unwrap_err();

    assert!(matches!(err, ChatError::Embedding(_)));
    assert!(err.to_string().contains("384"));
}

#[tokio::test]
async fn embed_maps_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("model loading"))
        .mount(&server)
        .await;

    let embedder = HfEmbedder::with_base_url(server.uri(), "hf".to_string());
    let err = embedder.embed("hello").await.unwrap_err();

    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn build_index_embeds_every_profile_chunk() {
    let profile = Profile::from_value(json!({
        "personal_info": { "name": "Alice", "location": "Berlin" },
        "skills": ["Rust", "SQL"],
        "projects": [{ "name": "persona-chat" }, { "name": "tilemap" }]
    }))
    .unwrap();

    // Four chunks: personal_info, skills, projects[0], projects[1].
    let vectors: Vec<Vec<f32>> = (0..4).map(unit_vector).collect();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(vectors)))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = HfEmbedder::with_base_url(server.uri(), "hf".to_string());
    let index = build_index(&profile, &embedder).await.unwrap();

    assert_eq!(index.len(), 4);
    assert_eq!(index.dimension, 384);
    assert_eq!(index.embedding_model, "sentence-transformers/all-MiniLM-L6-v2");
    assert!(index
        .entries
        .iter()
        .any(|e| e.document.text.contains("location: Berlin")));
}
