/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of Lumen.
 *
 * Lumen is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Lumen is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Lumen. If not, see <https://www.gnu.org/licenses/>.
 */

//! POSIX-style limits.

/// The maximum number of file descriptors a process can have open at once.
pub const OPEN_MAX: usize = 1024;
/// The maximum length of a path in bytes, including the NUL byte.
pub const PATH_MAX: usize = 4096;
/// The maximum length of a filename in bytes, not including the NUL byte.
pub const NAME_MAX: usize = 255;
