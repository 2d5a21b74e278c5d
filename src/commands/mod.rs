/*!
Command handlers for the CLI

- `mcp`       - servers, tools, call, resources, prompts
- `sessions`  - inspect and delete persisted sessions

Handlers print with `prettytable` and return the library `Result`; the
binary wraps them in `anyhow`.
*/

pub mod mcp;
pub mod sessions;
