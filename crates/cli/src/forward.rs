//! `-p` port publishing, in the style of `docker run -p`.

use crate::error::ArgError;

/// Local address used when only ports are given.
const ANY_ADDR: &str = "0.0.0.0";

/// Translate `[[LOCALIP:]LOCALPORT:]REMOTEPORT` into an `ssh -L` forward,
/// always targeting `localhost` on the remote side.
pub fn parse_publish(spec: &str) -> Result<String, ArgError> {
    let port = |field: &str| {
        field.parse::<u16>().map_err(|_| ArgError::InvalidPort {
            spec: spec.to_string(),
            port: field.to_string(),
        })
    };

    let fields: Vec<&str> = spec.split(':').collect();
    match fields.as_slice() {
        [remote] => {
            let remote = port(remote)?;
            Ok(format!("{ANY_ADDR}:{remote}:localhost:{remote}"))
        }
        [local, remote] => Ok(format!(
            "{ANY_ADDR}:{}:localhost:{}",
            port(local)?,
            port(remote)?
        )),
        [ip, local, remote] => Ok(format!(
            "{ip}:{}:localhost:{}",
            port(local)?,
            port(remote)?
        )),
        _ => Err(ArgError::InvalidPublishShape {
            spec: spec.to_string(),
        }),
    }
}
