use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use crate::client::NamingClient;
use crate::cmd::fs_command::FsCommands;
use crate::storage::grpc::storage_stub;

const TRANSFER_CHUNK_SIZE: u64 = 1024 * 1024;

pub async fn handle_fs_command(command: FsCommands, server: &str) -> anyhow::Result<()> {
    let client = NamingClient::new(server);
    match command {
        FsCommands::Ls { path } => handle_ls(path, &client).await?,
        FsCommands::Mkdir { path } => handle_mkdir(path, &client).await?,
        FsCommands::Touch { path } => handle_touch(path, &client).await?,
        FsCommands::Rm { path } => handle_rm(path, &client).await?,
        FsCommands::Stat { path } => handle_stat(path, &client).await?,
        FsCommands::Locate { path } => handle_locate(path, &client).await?,
        FsCommands::Cat { path } => handle_cat(path, &client).await?,
        FsCommands::Put { local_path, remote_path } => {
            handle_put(local_path, remote_path, &client).await?
        }
    }
    Ok(())
}

async fn handle_ls(path: String, client: &NamingClient) -> anyhow::Result<()> {
    let names = client.list(&path).await?;
    if names.is_empty() {
        println!("No entries in {path}");
        return Ok(());
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

async fn handle_mkdir(path: String, client: &NamingClient) -> anyhow::Result<()> {
    if client.create_directory(&path).await? {
        println!("Created directory {path}");
    } else {
        println!("{path} already exists");
    }
    Ok(())
}

async fn handle_touch(path: String, client: &NamingClient) -> anyhow::Result<()> {
    if client.create_file(&path).await? {
        println!("Created file {path}");
    } else {
        println!("{path} already exists");
    }
    Ok(())
}

async fn handle_rm(path: String, client: &NamingClient) -> anyhow::Result<()> {
    if client.delete(&path).await? {
        println!("Deleted {path}");
    } else {
        println!("{path} was not deleted");
    }
    Ok(())
}

async fn handle_stat(path: String, client: &NamingClient) -> anyhow::Result<()> {
    if client.is_directory(&path).await? {
        println!("Path: {path}");
        println!("Type: Directory");
        return Ok(());
    }
    let endpoint = client.get_storage(&path).await?;
    let storage = storage_stub(&endpoint);
    let size = storage.size(&path.parse()?).await?;
    println!("Path: {path}");
    println!("Type: File");
    println!("Size: {size} bytes");
    println!("Served by: {endpoint}");
    Ok(())
}

async fn handle_locate(path: String, client: &NamingClient) -> anyhow::Result<()> {
    let endpoint = client.get_storage(&path).await?;
    println!("{endpoint}");
    Ok(())
}

async fn handle_cat(path: String, client: &NamingClient) -> anyhow::Result<()> {
    client.lock(&path, false).await?;
    let result = cat_locked(&path, client).await;
    client.unlock(&path, false).await?;
    result
}

async fn cat_locked(path: &str, client: &NamingClient) -> anyhow::Result<()> {
    let endpoint = client.get_storage(path).await?;
    let storage = storage_stub(&endpoint);
    let parsed = path.parse()?;
    let size = storage.size(&parsed).await?;

    let mut stdout = tokio::io::stdout();
    let mut offset = 0u64;
    while offset < size {
        let length = TRANSFER_CHUNK_SIZE.min(size - offset) as u32;
        let chunk = storage.read(&parsed, offset, length).await?;
        if chunk.is_empty() {
            break;
        }
        offset += chunk.len() as u64;
        stdout.write_all(&chunk).await?;
    }
    stdout.flush().await?;
    Ok(())
}

async fn handle_put(
    local_path: String,
    remote_path: String,
    client: &NamingClient,
) -> anyhow::Result<()> {
    let data = tokio::fs::read(&local_path).await?;
    if client.create_file(&remote_path).await? {
        println!("Created file {remote_path}");
    }

    client.lock(&remote_path, true).await?;
    let result = put_locked(&remote_path, Bytes::from(data), client).await;
    client.unlock(&remote_path, true).await?;
    result?;

    println!("Uploaded {local_path} to {remote_path}");
    Ok(())
}

async fn put_locked(path: &str, data: Bytes, client: &NamingClient) -> anyhow::Result<()> {
    let endpoint = client.get_storage(path).await?;
    let storage = storage_stub(&endpoint);
    let parsed = path.parse()?;

    let mut offset = 0usize;
    while offset < data.len() {
        let end = (offset + TRANSFER_CHUNK_SIZE as usize).min(data.len());
        storage.write(&parsed, offset as u64, data.slice(offset..end)).await?;
        offset = end;
    }
    Ok(())
}
