use crate::generator::Operation;
use crate::store::{BatchMode, Codec, Connector, Store};
use ::redis::{Client, Cmd, Connection, Value};
use anyhow::{Context, Result, bail};
use std::hint::black_box;
use std::sync::Arc;

#[derive(Clone)]
pub struct RedisConnector {
    client: Client,
    url: String,
    codec: Codec,
}

impl RedisConnector {
    /// Validates the address; no connection is opened until [`Connector::connect`].
    pub fn new(host: &str, port: u16, codec: Codec) -> Result<Self> {
        let url = format!("redis://{host}:{port}/");
        let client = Client::open(url.as_str()).with_context(|| format!("invalid address {url}"))?;
        Ok(RedisConnector { client, url, codec })
    }
}

impl Connector for RedisConnector {
    fn connect(&self) -> Result<Box<dyn Store>> {
        let conn = self
            .client
            .get_connection()
            .with_context(|| format!("connect to {}", self.url))?;
        Ok(Box::new(RedisStore {
            conn,
            codec: self.codec,
        }))
    }

    fn describe(&self) -> String {
        format!("{} ({:?} codec)", self.url, self.codec)
    }

    fn share(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }
}

struct RedisStore {
    conn: Connection,
    codec: Codec,
}

impl RedisStore {
    fn command(&self, op: Operation) -> Cmd {
        let mut cmd = match op {
            Operation::Get(_) => ::redis::cmd("GET"),
            Operation::Set(..) => ::redis::cmd("SET"),
        };
        match (op, self.codec) {
            (Operation::Get(k), Codec::Fast) => cmd.arg(k),
            (Operation::Get(k), Codec::Generic) => cmd.arg(k.to_string()),
            (Operation::Set(k, v), Codec::Fast) => cmd.arg(k).arg(v),
            (Operation::Set(k, v), Codec::Generic) => cmd.arg(k.to_string()).arg(v.to_vec()),
        };
        cmd
    }
}

impl Store for RedisStore {
    fn get(&mut self, key: u64) -> Result<bool> {
        match self.codec {
            Codec::Fast => {
                let v: Option<()> = ::redis::cmd("GET")
                    .arg(key)
                    .query(&mut self.conn)
                    .context("get")?;
                Ok(v.is_some())
            }
            Codec::Generic => {
                let v: Value = ::redis::cmd("GET")
                    .arg(key.to_string())
                    .query(&mut self.conn)
                    .context("get")?;
                let hit = !matches!(v, Value::Nil);
                black_box(materialize(&v));
                Ok(hit)
            }
        }
    }

    fn set(&mut self, key: u64, value: &[u8]) -> Result<()> {
        match self.codec {
            Codec::Fast => ::redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query::<()>(&mut self.conn)
                .context("set"),
            Codec::Generic => {
                let v: Value = ::redis::cmd("SET")
                    .arg(key.to_string())
                    .arg(value.to_vec())
                    .query(&mut self.conn)
                    .context("set")?;
                black_box(materialize(&v));
                Ok(())
            }
        }
    }

    fn flush_all(&mut self) -> Result<()> {
        ::redis::cmd("FLUSHALL")
            .query::<()>(&mut self.conn)
            .context("flushall")
    }

    fn execute_batch(&mut self, ops: &[Operation], mode: BatchMode) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = ::redis::pipe();
        if mode == BatchMode::Transaction {
            pipe.atomic();
        }
        for op in ops {
            match (op, self.codec) {
                (Operation::Get(k), Codec::Fast) => pipe.get(*k),
                (Operation::Get(k), Codec::Generic) => pipe.get(k.to_string()),
                (Operation::Set(k, v), Codec::Fast) => pipe.set(*k, *v),
                (Operation::Set(k, v), Codec::Generic) => pipe.set(k.to_string(), v.to_vec()),
            };
        }
        match self.codec {
            Codec::Fast => pipe
                .query::<()>(&mut self.conn)
                .with_context(|| format!("pipeline of {} ({mode:?})", ops.len())),
            Codec::Generic => {
                let replies: Vec<Value> = pipe
                    .query(&mut self.conn)
                    .with_context(|| format!("pipeline of {} ({mode:?})", ops.len()))?;
                for reply in &replies {
                    black_box(materialize(reply));
                }
                Ok(())
            }
        }
    }

    fn submit(&mut self, op: Operation) -> Result<()> {
        let packed = self.command(op).get_packed_command();
        self.conn
            .send_packed_command(&packed)
            .context("send command")
    }

    fn complete(&mut self) -> Result<()> {
        let reply = self.conn.recv_response().context("receive reply")?;
        if let Value::ServerError(e) = &reply {
            bail!("server error: {e:?}");
        }
        if self.codec == Codec::Generic {
            black_box(materialize(&reply));
        }
        Ok(())
    }
}

/// Copies every string payload out of a reply tree.
fn materialize(value: &Value) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    collect(value, &mut out);
    out
}

fn collect(value: &Value, out: &mut Vec<Vec<u8>>) {
    match value {
        Value::BulkString(bytes) => out.push(bytes.clone()),
        Value::SimpleString(s) => out.push(s.as_bytes().to_vec()),
        Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialize_walks_nested_replies() {
        let reply = Value::Array(vec![
            Value::BulkString(b"abc".to_vec()),
            Value::Nil,
            Value::Okay,
            Value::Array(vec![Value::SimpleString("OK".into())]),
        ]);
        assert_eq!(
            materialize(&reply),
            vec![b"abc".to_vec(), b"OK".to_vec()]
        );
    }

    #[test]
    fn connector_does_not_connect_eagerly() {
        let c = RedisConnector::new("127.0.0.1", 6390, Codec::Generic).unwrap();
        assert_eq!(c.describe(), "redis://127.0.0.1:6390/ (Generic codec)");
    }
}
