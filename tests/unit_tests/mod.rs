mod expansion;
mod functions;
mod io;
mod parameter;
mod problem;
mod registry;
