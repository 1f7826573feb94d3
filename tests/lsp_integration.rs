//! Integration tests for `LanguageClient` against the `mockls` binary.

use std::time::Duration;

use anyhow::{Context, Result};
use lsp_types::{
    DidOpenTextDocumentParams, GotoDefinitionParams, GotoDefinitionResponse, HoverContents,
    HoverParams, MarkupContent, PartialResultParams, Position, ReferenceContext, ReferenceParams,
    TextDocumentIdentifier, TextDocumentItem, TextDocumentPositionParams, WorkDoneProgressParams,
    WorkspaceSymbolParams, WorkspaceSymbolResponse,
};
use tempfile::tempdir;

use langserver_shim::lsp::{ClientError, LanguageClient, ServerOptions, path_to_uri};

const SOURCE: &str = "package main\n\nfunc helper() {}\n\nfunc main() {\n\thelper()\n}\n";
const TIMEOUT: Duration = Duration::from_secs(5);

fn mockls(args: &[&str]) -> ServerOptions {
    ServerOptions::Command {
        command: env!("CARGO_BIN_EXE_mockls").to_string(),
        args: args.iter().map(|a| (*a).to_string()).collect(),
    }
}

fn position(uri: &lsp_types::Uri, line: u32, character: u32) -> TextDocumentPositionParams {
    TextDocumentPositionParams {
        text_document: TextDocumentIdentifier { uri: uri.clone() },
        position: Position { line, character },
    }
}

#[tokio::test]
async fn test_requests_round_trip_through_mockls() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("main.go");
    std::fs::write(&file, SOURCE)?;
    let uri = path_to_uri(&file)?;

    let client = LanguageClient::connect(&mockls(&[]), "mockls", TIMEOUT).await?;
    let init = client.initialize(dir.path(), None).await?;
    assert_eq!(
        init.server_info.map(|info| info.name).as_deref(),
        Some("mockls")
    );

    client
        .did_open(DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: uri.clone(),
                language_id: "go".to_string(),
                version: 1,
                text: SOURCE.to_string(),
            },
        })
        .await?;

    let hover = client
        .hover(HoverParams {
            text_document_position_params: position(&uri, 5, 2),
            work_done_progress_params: WorkDoneProgressParams::default(),
        })
        .await?
        .context("hover result")?;
    let HoverContents::Markup(MarkupContent { value, .. }) = hover.contents else {
        anyhow::bail!("expected markup hover contents");
    };
    assert_eq!(value, "mockls: helper");

    let definition = client
        .definition(GotoDefinitionParams {
            text_document_position_params: position(&uri, 5, 2),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        })
        .await?
        .context("definition result")?;
    let GotoDefinitionResponse::Scalar(location) = definition else {
        anyhow::bail!("expected a single location");
    };
    assert_eq!(location.range.start, Position::new(2, 5));

    let references = client
        .references(ReferenceParams {
            text_document_position: position(&uri, 2, 6),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: ReferenceContext {
                include_declaration: true,
            },
        })
        .await?
        .context("references result")?;
    assert_eq!(references.len(), 2);

    let symbols = client
        .workspace_symbols(WorkspaceSymbolParams {
            query: "main".to_string(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        })
        .await?
        .context("symbol result")?;
    let WorkspaceSymbolResponse::Flat(symbols) = symbols else {
        anyhow::bail!("expected flat symbol list");
    };
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].name, "main");

    assert!(client.process_id().is_some());
    client.close(Duration::from_millis(500)).await;
    Ok(())
}

#[tokio::test]
async fn test_server_requests_are_answered() -> Result<()> {
    let dir = tempdir()?;
    let client = LanguageClient::connect(
        &mockls(&["--send-configuration-request", "--log-message", "ready"]),
        "mockls",
        TIMEOUT,
    )
    .await?;

    client.initialize(dir.path(), None).await?;
    // The client must still be usable after answering the server's request.
    client.shutdown().await?;
    client.close(Duration::from_millis(500)).await;
    Ok(())
}

#[tokio::test]
async fn test_server_error_is_reported() -> Result<()> {
    let dir = tempdir()?;
    let client = LanguageClient::connect(
        &mockls(&["--fail-on", "workspace/symbol"]),
        "mockls",
        TIMEOUT,
    )
    .await?;
    client.initialize(dir.path(), None).await?;

    let err = client
        .workspace_symbols(WorkspaceSymbolParams {
            query: String::new(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        })
        .await
        .expect_err("mockls fails workspace/symbol");
    assert!(matches!(err, ClientError::Server { code: -32603, .. }));
    assert!(client.is_alive());

    client.close(Duration::from_millis(500)).await;
    Ok(())
}

#[tokio::test]
async fn test_connection_closes_when_server_exits() -> Result<()> {
    let dir = tempdir()?;
    let client = LanguageClient::connect(&mockls(&[]), "mockls", TIMEOUT).await?;
    client.initialize(dir.path(), None).await?;
    client.shutdown().await?;

    for _ in 0..50 {
        if !client.is_alive() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!client.is_alive());

    let err = client
        .hover(HoverParams {
            text_document_position_params: position(&path_to_uri(dir.path())?, 0, 0),
            work_done_progress_params: WorkDoneProgressParams::default(),
        })
        .await
        .expect_err("connection is closed");
    assert!(matches!(err, ClientError::ConnectionClosed));
    Ok(())
}
