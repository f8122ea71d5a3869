mod fixtures;
mod manager;
mod streamer;
